use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MonitorKind;
use crate::monitor::PushIngress;
use crate::store::StateStore;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub monitor_kind: MonitorKind,
    pub monitor_key: String,
    pub store: Arc<dyn StateStore>,
    /// Entry point of the push monitor; `None` in pull mode
    pub ingress: Option<PushIngress>,
    /// Secret incoming webhooks must be signed with, if any
    pub webhook_secret: Option<String>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        monitor_kind: MonitorKind,
        monitor_key: impl Into<String>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            monitor_kind,
            monitor_key: monitor_key.into(),
            store,
            ingress: None,
            webhook_secret: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_ingress(mut self, ingress: PushIngress, webhook_secret: Option<String>) -> Self {
        self.ingress = Some(ingress);
        self.webhook_secret = webhook_secret;
        self
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
