use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::source::EventSource;
use super::{Backoff, BatchStream, Monitor, RetryPolicy};
use crate::error::RelayError;
use crate::metrics::collectors as relay_metrics;
use crate::types::{BlockBatch, SourceEvent, TransactionLocation, TxId};

const MONITOR_KIND: &str = "pull";

/// Configuration for the confirmation-depth polling monitor
#[derive(Debug, Clone)]
pub struct PullMonitorConfig {
    /// Number of blocks that must follow a block before it is emitted
    pub confirmations: u64,
    /// How long to wait when no newly confirmed block is available
    pub poll_interval: Duration,
    /// Backoff applied after a failed fetch
    pub retry: RetryPolicy,
}

impl Default for PullMonitorConfig {
    fn default() -> Self {
        Self {
            confirmations: 10,
            poll_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Polls an [`EventSource`] and emits one batch per block once the block is
/// buried under `confirmations` newer blocks.
pub struct PullMonitor {
    source: Arc<dyn EventSource>,
    cursor: TransactionLocation,
    watched_address: String,
    config: PullMonitorConfig,
}

impl PullMonitor {
    pub fn new(
        source: Arc<dyn EventSource>,
        cursor: TransactionLocation,
        watched_address: impl Into<String>,
        config: PullMonitorConfig,
    ) -> Self {
        Self {
            source,
            cursor,
            watched_address: watched_address.into(),
            config,
        }
    }
}

impl Monitor for PullMonitor {
    fn kind(&self) -> &'static str {
        MONITOR_KIND
    }

    fn produce(self) -> BatchStream {
        let PullMonitor {
            source,
            cursor,
            watched_address,
            config,
        } = self;

        let stream = async_stream::stream! {
            let mut backoff = Backoff::new(config.retry.clone());

            info!(
                block_hash = %cursor.block_hash,
                tx_id = ?cursor.tx_id,
                confirmations = config.confirmations,
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                "Starting pull monitor"
            );

            let mut cursor_index = loop {
                match resolve_cursor_index(source.as_ref(), &cursor).await {
                    Ok(index) => break index,
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Persisted cursor does not match the canonical chain");
                        yield Err(e);
                        return;
                    }
                    Err(e) => {
                        relay_metrics::record_monitor_error(MONITOR_KIND, "resolve_cursor");
                        let delay = backoff.next_delay();
                        warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Failed to resolve cursor block");
                        sleep(delay).await;
                    }
                }
            };
            backoff.reset();

            // A cursor with a transaction id means the block was interrupted
            // part-way; replay whatever followed the last settled event.
            if let Some(tx_id) = &cursor.tx_id {
                let events = loop {
                    match source.events_for_block(&cursor.block_hash, &watched_address).await {
                        Ok(events) => break events,
                        Err(e) => {
                            relay_metrics::record_monitor_error(MONITOR_KIND, "events");
                            let delay = backoff.next_delay();
                            warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Failed to refetch cursor block");
                            sleep(delay).await;
                        }
                    }
                };
                backoff.reset();

                match events_after(events, tx_id) {
                    Some(remaining) if !remaining.is_empty() => {
                        info!(
                            block_index = cursor_index,
                            block_hash = %cursor.block_hash,
                            remaining = remaining.len(),
                            "Resuming partially processed block"
                        );
                        relay_metrics::record_batch(MONITOR_KIND, remaining.len());
                        yield Ok(BlockBatch::new(cursor.block_hash.clone(), remaining));
                    }
                    Some(_) => {
                        debug!(block_hash = %cursor.block_hash, "Cursor block already fully processed");
                    }
                    None => {
                        let e = RelayError::inconsistency(
                            cursor.block_hash.clone(),
                            format!("transaction {tx_id} is not part of the block"),
                        );
                        error!(error = %e, "Persisted cursor does not match the canonical chain");
                        yield Err(e);
                        return;
                    }
                }
            }

            loop {
                let tip_index = match source.tip_index().await {
                    Ok(tip) => tip,
                    Err(e) => {
                        relay_metrics::record_monitor_error(MONITOR_KIND, "tip");
                        let delay = backoff.next_delay();
                        warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Failed to fetch tip index");
                        sleep(delay).await;
                        continue;
                    }
                };

                let safe_index = tip_index.saturating_sub(config.confirmations);
                if safe_index <= cursor_index {
                    debug!(
                        tip_index,
                        safe_index,
                        cursor_index,
                        "No newly confirmed blocks"
                    );
                    backoff.reset();
                    sleep(config.poll_interval).await;
                    continue;
                }

                let mut failed = false;
                for index in (cursor_index + 1)..=safe_index {
                    match fetch_batch(source.as_ref(), index, &watched_address).await {
                        Ok(batch) => {
                            info!(
                                block_index = index,
                                block_hash = %batch.block_hash,
                                events = batch.events.len(),
                                "Emitting confirmed block"
                            );
                            relay_metrics::record_batch(MONITOR_KIND, batch.events.len());
                            relay_metrics::set_last_block_index(index);
                            yield Ok(batch);
                            cursor_index = index;
                        }
                        Err(e) => {
                            relay_metrics::record_monitor_error(MONITOR_KIND, "block");
                            warn!(block_index = index, error = %e, "Failed to fetch confirmed block");
                            failed = true;
                            break;
                        }
                    }
                }

                if failed {
                    sleep(backoff.next_delay()).await;
                } else {
                    backoff.reset();
                }
            }
        };

        Box::pin(stream)
    }
}

/// Resolve the cursor's block to its index, verifying it is still canonical
#[instrument(skip(source))]
async fn resolve_cursor_index(
    source: &dyn EventSource,
    cursor: &TransactionLocation,
) -> Result<u64, RelayError> {
    let index = source
        .block_index(&cursor.block_hash)
        .await
        .map_err(|e| RelayError::fetch("cursor block index", e))?;

    let canonical = source
        .block_hash(index)
        .await
        .map_err(|e| RelayError::fetch("canonical block hash", e))?;

    if !canonical.eq_ignore_ascii_case(&cursor.block_hash) {
        return Err(RelayError::inconsistency(
            cursor.block_hash.clone(),
            format!("canonical block at index {index} is {canonical}"),
        ));
    }

    Ok(index)
}

async fn fetch_batch(
    source: &dyn EventSource,
    index: u64,
    watched_address: &str,
) -> Result<BlockBatch, RelayError> {
    let block_hash = source
        .block_hash(index)
        .await
        .map_err(|e| RelayError::fetch("block hash", e))?;

    let events = source
        .events_for_block(&block_hash, watched_address)
        .await
        .map_err(|e| RelayError::fetch("block events", e))?;

    Ok(BlockBatch::new(block_hash, events))
}

/// Events that follow the last occurrence of `tx_id`, or `None` when the
/// transaction is not among `events`
pub(crate) fn events_after(events: Vec<SourceEvent>, tx_id: &TxId) -> Option<Vec<SourceEvent>> {
    let position = events.iter().rposition(|event| &event.tx_id == tx_id)?;
    Some(events.into_iter().skip(position + 1).collect())
}
