use async_trait::async_trait;

use super::webhook_event::WebhookEvent;
use crate::types::{BlockHash, SourceEvent};

/// Read access to the source chain used by the [`PullMonitor`].
///
/// [`PullMonitor`]: super::PullMonitor
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Index of the block with the given hash
    async fn block_index(&self, block_hash: &str) -> anyhow::Result<u64>;

    /// Index of the current chain tip
    async fn tip_index(&self) -> anyhow::Result<u64>;

    /// Hash of the canonical block at `index`
    async fn block_hash(&self, index: u64) -> anyhow::Result<BlockHash>;

    /// Events of the given block that are addressed to `watched_address`,
    /// in chain order
    async fn events_for_block(
        &self,
        block_hash: &str,
        watched_address: &str,
    ) -> anyhow::Result<Vec<SourceEvent>>;
}

/// Companion query of the webhook indexer used by the [`PushMonitor`] to
/// catch up on events delivered while the relay was down.
///
/// [`PushMonitor`]: super::PushMonitor
#[async_trait]
pub trait CatchUpQuery: Send + Sync {
    /// Every event with a block index at or above the given block
    async fn events_since(&self, block_from: &str) -> anyhow::Result<Vec<WebhookEvent>>;
}
