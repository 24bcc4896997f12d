#![allow(clippy::unwrap_used)]
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bridge_relay::address::DestinationAddress;
use bridge_relay::monitor::{CatchUpQuery, WebhookEvent};
use bridge_relay::observer::{
    DestinationMinter, ExchangeConfig, ExchangeObserver, MintReceipt, ObserverConfig,
    SourceTransfer,
};
use bridge_relay::store::MemoryStateStore;
use bridge_relay::types::TxId;
use bridge_relay::webhooks::RecordingSink;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Mutex;

pub const WATCHED: &str = "0x9093dd96c4bb6b44a9e0a522e2de49641f146223";
pub const RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
pub const MONITOR_KEY: &str = "nineChronicles";

/// Executor double recording every mint and refund
#[derive(Default)]
pub struct MockExecutor {
    pub mints: Mutex<Vec<(String, u128)>>,
    pub refunds: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DestinationMinter for MockExecutor {
    async fn mint(
        &self,
        recipient: &DestinationAddress,
        amount: u128,
    ) -> anyhow::Result<MintReceipt> {
        let mut mints = self.mints.lock().await;
        mints.push((recipient.to_string(), amount));
        Ok(MintReceipt {
            transaction_hash: format!("0xmint{}", mints.len()),
        })
    }
}

#[async_trait]
impl SourceTransfer for MockExecutor {
    async fn transfer(&self, recipient: &str, amount: &str, _memo: &str) -> anyhow::Result<TxId> {
        let mut refunds = self.refunds.lock().await;
        refunds.push((recipient.to_string(), amount.to_string()));
        Ok(format!("refund{}", refunds.len()))
    }
}

/// Catch-up query answering with a fixed result
pub struct StaticCatchUp(pub Option<Vec<WebhookEvent>>);

#[async_trait]
impl CatchUpQuery for StaticCatchUp {
    async fn events_since(&self, _block_from: &str) -> anyhow::Result<Vec<WebhookEvent>> {
        self.0.clone().ok_or_else(|| anyhow!("indexer unavailable"))
    }
}

/// Indexer holding a fixed list of events, answering by block index
pub struct IndexedCatchUp(pub Vec<WebhookEvent>);

#[async_trait]
impl CatchUpQuery for IndexedCatchUp {
    async fn events_since(&self, block_from: &str) -> anyhow::Result<Vec<WebhookEvent>> {
        let from = self
            .0
            .iter()
            .find(|event| event.block_hash == block_from)
            .map(|event| event.block_index)
            .ok_or_else(|| anyhow!("unknown block {block_from}"))?;
        Ok(self
            .0
            .iter()
            .filter(|event| event.block_index >= from)
            .cloned()
            .collect())
    }
}

pub fn webhook_event(block_index: u64, log_index: u64, tx: &str, amount: &str) -> WebhookEvent {
    serde_json::from_value(webhook_body(block_index, log_index, tx, amount, RECIPIENT)).unwrap()
}

pub struct TestObserver {
    pub observer: ExchangeObserver,
    pub executor: Arc<MockExecutor>,
    pub store: Arc<MemoryStateStore>,
    pub sink: RecordingSink,
}

pub fn observer_config() -> ObserverConfig {
    ObserverConfig {
        exchange: ExchangeConfig {
            fee_ratio: Decimal::new(1, 2),
            minimum: Decimal::new(1, 0),
            maximum: Decimal::new(10_000, 0),
            ..ExchangeConfig::default()
        },
        ..ObserverConfig::default()
    }
}

pub fn test_observer() -> TestObserver {
    let executor = Arc::new(MockExecutor::default());
    let store = Arc::new(MemoryStateStore::new());
    let sink = RecordingSink::new();
    let observer = ExchangeObserver::new(
        executor.clone(),
        executor.clone(),
        store.clone(),
        Arc::new(sink.clone()),
        observer_config(),
    );

    TestObserver {
        observer,
        executor,
        store,
        sink,
    }
}

/// Webhook body of a burn on the watched contract
pub fn webhook_body(block_index: u64, log_index: u64, tx: &str, amount: &str, recipient: &str) -> Value {
    json!({
        "timestamp": "2024-01-01T00:00:00Z",
        "blockIndex": block_index,
        "logIndex": log_index,
        "blockHash": format!("0xblock{block_index}"),
        "transactionHash": tx,
        "sourceAddress": WATCHED,
        "abiHash": "0xabi",
        "abiSignature": "Burn(address,bytes32,uint256)",
        "args": {
            "named": {
                "sender": "0xsender",
                "amount": amount,
                "recipient": recipient
            },
            "ordered": []
        }
    })
}
