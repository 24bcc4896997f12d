pub mod messages;
pub mod notifier;


use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

pub use messages::{ExplorerLinks, RefundEvent, WrappedEvent, WrappingFailureEvent};
pub use notifier::{RetryConfig, WebhookConfig, WebhookEndpoint, WebhookNotifier};

/// Header carrying the HMAC-SHA256 signature of a request body
pub const SIGNATURE_HEADER: &str = "X-Signature-SHA256";

/// Destination of human-facing relay notifications.
///
/// Implementations must not block event processing on delivery; a returned
/// error is logged by the caller and never changes an exchange outcome.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, channel: &str, message: Value) -> anyhow::Result<()>;
}

/// Sink that drops every message, used when notifications are disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _channel: &str, _message: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink that keeps every message in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<(String, Value)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, channel: &str, message: Value) -> anyhow::Result<()> {
        self.messages
            .lock()
            .await
            .push((channel.to_string(), message));
        Ok(())
    }
}
