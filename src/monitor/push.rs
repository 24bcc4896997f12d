use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::source::CatchUpQuery;
use super::webhook_event::{ArgumentMapping, WebhookEvent};
use super::{BatchStream, Monitor};
use crate::metrics::collectors as relay_metrics;
use crate::types::{BlockBatch, BlockHash, TransactionLocation};

const MONITOR_KIND: &str = "push";

/// Identities of emitted events remembered to recognize redeliveries
pub const EMITTED_HISTORY: usize = 10_000;

/// Configuration for the webhook-fed monitor
#[derive(Debug, Clone)]
pub struct PushMonitorConfig {
    /// How often the pending events are drained into batches
    pub drain_interval: Duration,
    /// How webhook arguments map onto a source event
    pub arguments: ArgumentMapping,
}

impl Default for PushMonitorConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(2),
            arguments: ArgumentMapping::default(),
        }
    }
}

/// Identity of an on-chain event; orders events by block, then log position
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub block_index: u64,
    pub block_hash: BlockHash,
    pub log_index: u64,
    pub transaction_hash: String,
}

impl From<&WebhookEvent> for EventKey {
    fn from(event: &WebhookEvent) -> Self {
        Self {
            block_index: event.block_index,
            block_hash: event.block_hash.clone(),
            log_index: event.log_index,
            transaction_hash: event.transaction_hash.clone(),
        }
    }
}

/// Events received but not yet handed to the observer.
///
/// Insertion and draining both go through the same mutex, so an event is
/// either in the snapshot taken by [`PendingEvents::drain`] or still pending
/// afterwards, never both and never neither.
#[derive(Debug, Default)]
pub struct PendingEvents {
    events: Mutex<BTreeMap<EventKey, WebhookEvent>>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event; returns `false` if the same event was already pending
    pub async fn insert(&self, event: WebhookEvent) -> bool {
        let mut events = self.events.lock().await;
        let key = EventKey::from(&event);
        if events.contains_key(&key) {
            return false;
        }
        events.insert(key, event);
        relay_metrics::set_pending_push_events(events.len());
        true
    }

    /// Atomically take every pending event, leaving the set empty
    pub async fn drain(&self) -> BTreeMap<EventKey, WebhookEvent> {
        let mut events = self.events.lock().await;
        let taken = std::mem::take(&mut *events);
        relay_metrics::set_pending_push_events(0);
        taken
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

/// Group a drained snapshot into per-block runs, in block order
pub fn group_by_block(snapshot: BTreeMap<EventKey, WebhookEvent>) -> Vec<(BlockHash, Vec<WebhookEvent>)> {
    let mut groups: Vec<(BlockHash, Vec<WebhookEvent>)> = Vec::new();

    for (key, event) in snapshot {
        match groups.last_mut() {
            Some((block_hash, events)) if *block_hash == key.block_hash => events.push(event),
            _ => groups.push((key.block_hash, vec![event])),
        }
    }

    groups
}

/// Position of the newest event handed to the observer.
///
/// A drained event at or below the mark either was already emitted (a
/// redelivery, dropped) or arrived late. Late events are still settled,
/// but in batches that leave the cursor where it is, so the persisted
/// cursor never moves backwards.
#[derive(Debug, Default)]
pub struct HighWaterMark {
    position: Option<(u64, u64)>,
    recent: VecDeque<EventKey>,
    emitted: HashSet<EventKey>,
}

/// A drained snapshot split against the [`HighWaterMark`]
#[derive(Debug, Default)]
pub struct DrainSplit {
    pub late: BTreeMap<EventKey, WebhookEvent>,
    pub fresh: BTreeMap<EventKey, WebhookEvent>,
    pub redelivered: usize,
}

impl HighWaterMark {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(block_index, log_index)` of the newest event handed out
    pub fn position(&self) -> Option<(u64, u64)> {
        self.position
    }

    /// Record events that were settled before this process started
    pub fn seed<'a>(&mut self, processed: impl IntoIterator<Item = &'a WebhookEvent>) {
        for event in processed {
            let key = EventKey::from(event);
            self.advance(&key);
            self.remember(key);
        }
    }

    /// Classify a drained snapshot and move the mark past its fresh events
    pub fn split(&mut self, snapshot: BTreeMap<EventKey, WebhookEvent>) -> DrainSplit {
        let mut split = DrainSplit::default();

        for (key, event) in snapshot {
            if self.emitted.contains(&key) {
                split.redelivered += 1;
                continue;
            }
            let position = (key.block_index, key.log_index);
            let late = matches!(self.position, Some(mark) if position <= mark);
            self.remember(key.clone());
            if late {
                split.late.insert(key, event);
            } else {
                split.fresh.insert(key, event);
            }
        }

        if let Some(newest) = split.fresh.keys().next_back() {
            let newest = newest.clone();
            self.advance(&newest);
        }
        split
    }

    fn advance(&mut self, key: &EventKey) {
        let position = (key.block_index, key.log_index);
        if self.position.map_or(true, |mark| position > mark) {
            self.position = Some(position);
        }
    }

    fn remember(&mut self, key: EventKey) {
        if !self.emitted.insert(key.clone()) {
            return;
        }
        self.recent.push_back(key);
        if self.recent.len() > EMITTED_HISTORY {
            if let Some(oldest) = self.recent.pop_front() {
                self.emitted.remove(&oldest);
            }
        }
    }
}

/// Result of offering an event to the ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    Duplicate,
    /// The event was emitted by another contract
    Filtered,
}

/// Cloneable entry point used by the HTTP transport to feed the monitor
#[derive(Debug, Clone)]
pub struct PushIngress {
    watched_address: String,
    pending: Arc<PendingEvents>,
}

impl PushIngress {
    pub fn new(watched_address: impl Into<String>, pending: Arc<PendingEvents>) -> Self {
        Self {
            watched_address: watched_address.into(),
            pending,
        }
    }

    pub async fn ingest(&self, event: WebhookEvent) -> IngestOutcome {
        if !event
            .source_address
            .eq_ignore_ascii_case(&self.watched_address)
        {
            debug!(
                source_address = %event.source_address,
                transaction_hash = %event.transaction_hash,
                "Ignoring event from unwatched address"
            );
            return IngestOutcome::Filtered;
        }

        let transaction_hash = event.transaction_hash.clone();
        if self.pending.insert(event).await {
            debug!(transaction_hash = %transaction_hash, "Queued webhook event");
            IngestOutcome::Accepted
        } else {
            debug!(transaction_hash = %transaction_hash, "Webhook event already pending");
            IngestOutcome::Duplicate
        }
    }

    pub fn pending(&self) -> &Arc<PendingEvents> {
        &self.pending
    }
}

/// Monitor fed by webhook deliveries, drained into batches on a timer
pub struct PushMonitor {
    ingress: PushIngress,
    cursor: Option<TransactionLocation>,
    catch_up: Arc<dyn CatchUpQuery>,
    config: PushMonitorConfig,
}

impl PushMonitor {
    pub fn new(
        watched_address: impl Into<String>,
        cursor: Option<TransactionLocation>,
        catch_up: Arc<dyn CatchUpQuery>,
        config: PushMonitorConfig,
    ) -> Self {
        let ingress = PushIngress::new(watched_address, Arc::new(PendingEvents::new()));
        Self {
            ingress,
            cursor,
            catch_up,
            config,
        }
    }

    /// Handle for the HTTP transport; valid for the lifetime of the stream
    pub fn ingress(&self) -> PushIngress {
        self.ingress.clone()
    }
}

impl Monitor for PushMonitor {
    fn kind(&self) -> &'static str {
        MONITOR_KIND
    }

    fn produce(self) -> BatchStream {
        let PushMonitor {
            ingress,
            cursor,
            catch_up,
            config,
        } = self;

        let stream = async_stream::stream! {
            info!(
                drain_interval_ms = config.drain_interval.as_millis() as u64,
                catch_up = cursor.is_some(),
                "Starting push monitor"
            );

            let mut mark = HighWaterMark::new();

            if let Some(cursor) = &cursor {
                let events = match catch_up.events_since(&cursor.block_hash).await {
                    Ok(events) => events,
                    Err(e) => {
                        relay_metrics::record_monitor_error(MONITOR_KIND, "catch_up");
                        warn!(error = %e, block_from = %cursor.block_hash, "Catch-up query failed, continuing without it");
                        Vec::new()
                    }
                };

                let fetched = events.len();
                let (processed, unprocessed) = split_processed(events, cursor);
                mark.seed(&processed);

                let mut accepted = 0usize;
                for event in unprocessed {
                    if ingress.ingest(event).await == IngestOutcome::Accepted {
                        accepted += 1;
                    }
                }
                info!(fetched, accepted, "Seeded pending events from catch-up query");
            }

            loop {
                let snapshot = ingress.pending().drain().await;
                if !snapshot.is_empty() {
                    debug!(events = snapshot.len(), "Drained pending webhook events");
                }

                let split = mark.split(snapshot);
                if split.redelivered > 0 {
                    debug!(events = split.redelivered, "Dropped redelivered webhook events");
                }
                if !split.late.is_empty() {
                    warn!(
                        events = split.late.len(),
                        high_water_mark = ?mark.position(),
                        "Webhook events arrived behind already emitted events"
                    );
                }

                // Older events first; only fresh ones may move the cursor
                let late = group_by_block(split.late).into_iter().map(|group| (group, false));
                let fresh = group_by_block(split.fresh).into_iter().map(|group| (group, true));
                for ((block_hash, raw_events), advances_cursor) in late.chain(fresh) {
                    let batch =
                        to_batch(&config.arguments, block_hash, &raw_events, advances_cursor);
                    let Some(batch) = batch else {
                        continue;
                    };

                    info!(
                        block_hash = %batch.block_hash,
                        events = batch.events.len(),
                        advances_cursor,
                        "Emitting webhook batch"
                    );
                    relay_metrics::record_batch(MONITOR_KIND, batch.events.len());
                    yield Ok(batch);
                }

                sleep(config.drain_interval).await;
            }
        };

        Box::pin(stream)
    }
}

/// Map one block's raw events, dropping those that cannot be mapped.
/// `None` when nothing is left.
fn to_batch(
    arguments: &ArgumentMapping,
    block_hash: BlockHash,
    raw_events: &[WebhookEvent],
    advances_cursor: bool,
) -> Option<BlockBatch> {
    let mut events = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        match arguments.to_source_event(raw) {
            Ok(event) => events.push(event),
            Err(e) => {
                relay_metrics::record_monitor_error(MONITOR_KIND, "mapping");
                warn!(
                    error = %e,
                    transaction_hash = %raw.transaction_hash,
                    log_index = raw.log_index,
                    "Dropping webhook event that cannot be mapped"
                );
            }
        }
    }

    if events.is_empty() {
        return None;
    }
    Some(if advances_cursor {
        BlockBatch::new(block_hash, events)
    } else {
        BlockBatch::late(block_hash, events)
    })
}

/// Split catch-up events into those the cursor says were already processed
/// and the rest.
///
/// Only the cursor's own block can hold processed events: everything up to
/// and including the cursor transaction, or the whole block when the cursor
/// carries no transaction.
pub(crate) fn split_processed(
    events: Vec<WebhookEvent>,
    cursor: &TransactionLocation,
) -> (Vec<WebhookEvent>, Vec<WebhookEvent>) {
    let in_cursor_block = |event: &WebhookEvent| event.block_hash.eq_ignore_ascii_case(&cursor.block_hash);

    let processed_up_to = match &cursor.tx_id {
        None => Some(u64::MAX),
        Some(tx_id) => events
            .iter()
            .filter(|event| in_cursor_block(event) && &event.transaction_hash == tx_id)
            .map(|event| event.log_index)
            .max(),
    };

    let Some(processed_up_to) = processed_up_to else {
        warn!(
            block_hash = %cursor.block_hash,
            tx_id = ?cursor.tx_id,
            "Cursor transaction not found in catch-up results, replaying the whole block"
        );
        return (Vec::new(), events);
    };

    events
        .into_iter()
        .partition(|event| in_cursor_block(event) && event.log_index <= processed_up_to)
}
