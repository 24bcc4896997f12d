use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::RelayError;
use crate::monitor::Monitor;
use crate::observer::ExchangeObserver;
use crate::types::ExchangeOutcome;

/// Counters of one relay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub batches: u64,
    pub minted: u64,
    pub refunded: u64,
    pub failed: u64,
}

/// Drives a monitor's batches through the observer, one batch at a time
pub struct Relay {
    observer: ExchangeObserver,
}

impl Relay {
    pub fn new(observer: ExchangeObserver) -> Self {
        Self { observer }
    }

    /// Run until shutdown is signalled, the monitor reports a fatal error or
    /// the observer can no longer persist the cursor.
    ///
    /// A batch already handed to the observer is always processed to the
    /// end; shutdown only takes effect between batches.
    pub async fn run<M: Monitor>(
        self,
        monitor: M,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<RelayStats, RelayError> {
        let kind = monitor.kind();
        let mut stream = monitor.produce();
        let mut stats = RelayStats::default();

        info!(monitor = kind, "Relay started");

        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = shutdown.recv() => {
                    info!(monitor = kind, "Relay received shutdown signal");
                    return Ok(stats);
                }
            };

            match item {
                Some(Ok(batch)) => {
                    stats.batches += 1;
                    for outcome in self.observer.observe(&batch).await {
                        match outcome {
                            ExchangeOutcome::Minted { .. } => stats.minted += 1,
                            ExchangeOutcome::Refunded { .. } => stats.refunded += 1,
                            ExchangeOutcome::Failed { .. } => stats.failed += 1,
                        }
                    }
                    if let Some(e) = self.observer.halted() {
                        error!(monitor = kind, error = %e, "Relay stopped on fatal error");
                        return Err(e);
                    }
                }
                Some(Err(e)) if e.is_fatal() => {
                    error!(monitor = kind, error = %e, "Relay stopped on fatal error");
                    return Err(e);
                }
                Some(Err(e)) => {
                    warn!(monitor = kind, error = %e, "Monitor reported a recoverable error");
                }
                None => {
                    info!(monitor = kind, "Monitor stream ended");
                    return Ok(stats);
                }
            }
        }
    }
}
