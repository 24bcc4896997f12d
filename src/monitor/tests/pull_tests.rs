use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing_test::traced_test;

use super::{fast_retry, next_within, WATCHED};
use crate::monitor::pull::events_after;
use crate::monitor::{EventSource, Monitor, PullMonitor, PullMonitorConfig};
use crate::types::{BlockHash, SourceEvent, TransactionLocation};

const WAIT: Duration = Duration::from_millis(150);

struct MockChain {
    /// Events per block, indexed by block index
    blocks: Vec<Vec<SourceEvent>>,
    tip: AtomicU64,
    /// Hashes that resolve to an index but are not canonical there
    orphans: HashMap<String, u64>,
    failing_tip_calls: AtomicU32,
}

fn hash(index: u64) -> BlockHash {
    format!("0x{index:02}")
}

fn source_event(index: u64, tx_id: &str) -> SourceEvent {
    SourceEvent {
        block_hash: hash(index),
        tx_id: tx_id.to_string(),
        source_address: WATCHED.to_string(),
        sender: "0xsender".to_string(),
        amount: "100".to_string(),
        memo: None,
    }
}

impl MockChain {
    fn new(length: u64, tip: u64) -> Self {
        let blocks = (0..length)
            .map(|index| vec![source_event(index, &format!("tx{index}"))])
            .collect();
        Self {
            blocks,
            tip: AtomicU64::new(tip),
            orphans: HashMap::new(),
            failing_tip_calls: AtomicU32::new(0),
        }
    }

    fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSource for MockChain {
    async fn block_index(&self, block_hash: &str) -> anyhow::Result<u64> {
        if let Some(index) = self.orphans.get(block_hash) {
            return Ok(*index);
        }
        (0..self.blocks.len() as u64)
            .find(|index| hash(*index) == block_hash)
            .ok_or_else(|| anyhow!("unknown block {block_hash}"))
    }

    async fn tip_index(&self) -> anyhow::Result<u64> {
        let remaining = self.failing_tip_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_tip_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("connection reset"));
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn block_hash(&self, index: u64) -> anyhow::Result<BlockHash> {
        if (index as usize) < self.blocks.len() {
            Ok(hash(index))
        } else {
            Err(anyhow!("block {index} does not exist"))
        }
    }

    async fn events_for_block(
        &self,
        block_hash: &str,
        watched_address: &str,
    ) -> anyhow::Result<Vec<SourceEvent>> {
        let index = self.block_index(block_hash).await?;
        Ok(self.blocks[index as usize]
            .iter()
            .filter(|event| event.source_address == watched_address)
            .cloned()
            .collect())
    }
}

fn config(confirmations: u64) -> PullMonitorConfig {
    PullMonitorConfig {
        confirmations,
        poll_interval: Duration::from_millis(10),
        retry: fast_retry(),
    }
}

fn monitor(chain: Arc<MockChain>, cursor: TransactionLocation, confirmations: u64) -> PullMonitor {
    PullMonitor::new(chain, cursor, WATCHED, config(confirmations))
}

#[tokio::test]
#[traced_test]
async fn test_waits_for_confirmations() {
    let chain = Arc::new(MockChain::new(30, 8));
    let mut stream = monitor(chain.clone(), TransactionLocation::block(hash(5)), 3).produce();

    // tip 8 - 3 = 5 is the cursor itself
    assert!(next_within(&mut stream, WAIT).await.is_none());
    assert!(!logs_contain("ERROR"));

    // tip reaches i + C + 1: exactly block i + 1 becomes available
    chain.set_tip(9);
    let batch = next_within(&mut stream, WAIT).await.unwrap().unwrap();
    assert_eq!(batch.block_hash, hash(6));
    assert_eq!(batch.events, vec![source_event(6, "tx6")]);
    assert!(next_within(&mut stream, WAIT).await.is_none());
}

#[tokio::test]
async fn test_never_emits_past_safe_index() {
    let chain = Arc::new(MockChain::new(30, 20));
    let mut stream = monitor(chain.clone(), TransactionLocation::block(hash(10)), 4).produce();

    let mut emitted = Vec::new();
    while let Some(batch) = next_within(&mut stream, WAIT).await {
        emitted.push(batch.unwrap().block_hash);
    }

    assert_eq!(emitted, (11..=16).map(hash).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_zero_confirmations_follow_tip() {
    let chain = Arc::new(MockChain::new(30, 3));
    let mut stream = monitor(chain, TransactionLocation::block(hash(1)), 0).produce();

    assert_eq!(next_within(&mut stream, WAIT).await.unwrap().unwrap().block_hash, hash(2));
    assert_eq!(next_within(&mut stream, WAIT).await.unwrap().unwrap().block_hash, hash(3));
    assert!(next_within(&mut stream, WAIT).await.is_none());
}

#[tokio::test]
async fn test_cursor_off_canonical_chain_is_fatal() {
    let mut chain = MockChain::new(30, 20);
    chain.orphans.insert("0xstale".to_string(), 5);
    let mut stream = monitor(Arc::new(chain), TransactionLocation::block("0xstale"), 3).produce();

    let error = next_within(&mut stream, WAIT).await.unwrap().unwrap_err();
    assert!(error.is_fatal());
    assert!(error.to_string().contains("0xstale"));

    // The stream ends after a fatal error
    assert!(next_within(&mut stream, WAIT).await.is_none());
}

#[tokio::test]
async fn test_resumes_inside_partially_processed_block() {
    let mut chain = MockChain::new(30, 8);
    chain.blocks[5] = vec![
        source_event(5, "a"),
        source_event(5, "b"),
        source_event(5, "c"),
    ];
    let cursor = TransactionLocation::new(hash(5), Some("b".to_string()));
    let mut stream = monitor(Arc::new(chain), cursor, 2).produce();

    let resumed = next_within(&mut stream, WAIT).await.unwrap().unwrap();
    assert_eq!(resumed.block_hash, hash(5));
    assert_eq!(resumed.events, vec![source_event(5, "c")]);

    let next = next_within(&mut stream, WAIT).await.unwrap().unwrap();
    assert_eq!(next.block_hash, hash(6));
}

#[tokio::test]
async fn test_fully_processed_cursor_block_is_not_replayed() {
    let chain = Arc::new(MockChain::new(30, 8));
    let cursor = TransactionLocation::new(hash(5), Some("tx5".to_string()));
    let mut stream = monitor(chain, cursor, 2).produce();

    let next = next_within(&mut stream, WAIT).await.unwrap().unwrap();
    assert_eq!(next.block_hash, hash(6));
}

#[tokio::test]
async fn test_unknown_cursor_transaction_is_fatal() {
    let chain = Arc::new(MockChain::new(30, 8));
    let cursor = TransactionLocation::new(hash(5), Some("missing".to_string()));
    let mut stream = monitor(chain, cursor, 2).produce();

    let error = next_within(&mut stream, WAIT).await.unwrap().unwrap_err();
    assert!(error.is_fatal());
}

#[tokio::test]
#[traced_test]
async fn test_transient_failures_are_retried() {
    let chain = MockChain::new(30, 7);
    chain.failing_tip_calls.store(3, Ordering::SeqCst);
    let mut stream = monitor(Arc::new(chain), TransactionLocation::block(hash(5)), 1).produce();

    let batch = next_within(&mut stream, WAIT).await.unwrap().unwrap();
    assert_eq!(batch.block_hash, hash(6));
    assert!(logs_contain("Failed to fetch tip index"));
    assert!(!logs_contain("ERROR"));
}

#[test]
fn test_events_after() {
    let events = vec![source_event(1, "a"), source_event(1, "b"), source_event(1, "c")];

    assert_eq!(
        events_after(events.clone(), &"a".to_string()),
        Some(vec![source_event(1, "b"), source_event(1, "c")])
    );
    assert_eq!(events_after(events.clone(), &"c".to_string()), Some(Vec::new()));
    assert_eq!(events_after(events, &"z".to_string()), None);
}
