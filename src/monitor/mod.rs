//! Monitors turn raw chain activity into an ordered stream of [`BlockBatch`]es.
//!
//! Two strategies are provided:
//!
//! - [`PullMonitor`] polls an [`EventSource`] and only emits blocks buried
//!   under the configured number of confirmations.
//! - [`PushMonitor`] is fed by an external indexer through a webhook and
//!   periodically drains what it received, grouped by block.
//!
//! Both hand out a lazy, infinite [`BatchStream`]. The only error a stream
//! ever yields is fatal; recoverable failures are logged and retried inside
//! the monitor.

use std::time::Duration;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::types::BlockBatch;

pub mod pull;
pub mod push;
pub mod source;
pub mod webhook_event;

#[cfg(test)]
mod tests;

pub use pull::{PullMonitor, PullMonitorConfig};
pub use push::{IngestOutcome, PendingEvents, PushIngress, PushMonitor, PushMonitorConfig};
pub use source::{CatchUpQuery, EventSource};
pub use webhook_event::{ArgumentMapping, EventArguments, MappingError, WebhookEvent};

/// Stream of batches produced by a monitor
pub type BatchStream = BoxStream<'static, Result<BlockBatch, RelayError>>;

/// A strategy producing block batches for the observer
pub trait Monitor: Send {
    /// Short name used in logs and metrics
    fn kind(&self) -> &'static str;

    /// Consume the monitor and start producing batches
    fn produce(self) -> BatchStream;
}

/// Backoff applied after a failed monitor cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    /// Delay after the first failure in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound on the delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier applied after each consecutive failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Exponential backoff state for one monitor loop
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    next_delay_ms: u64,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let next_delay_ms = policy.initial_delay_ms;
        Self {
            policy,
            next_delay_ms,
        }
    }

    /// Delay to wait after another consecutive failure
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next_delay_ms.min(self.policy.max_delay_ms);
        self.next_delay_ms = ((self.next_delay_ms as f64 * self.policy.backoff_multiplier) as u64)
            .min(self.policy.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.next_delay_ms = self.policy.initial_delay_ms;
    }
}
