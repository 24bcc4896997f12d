#![allow(clippy::unwrap_used)]
mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bridge_relay::config::MonitorKind;
use bridge_relay::error::RelayError;
use bridge_relay::monitor::{
    EventSource, PullMonitor, PullMonitorConfig, PushMonitor, PushMonitorConfig, RetryPolicy,
};
use bridge_relay::observer::{ExchangeObserver, ObserverConfig};
use bridge_relay::relay::Relay;
use bridge_relay::router::relay_router;
use bridge_relay::state::AppState;
use bridge_relay::store::StateStore;
use bridge_relay::types::{BlockHash, SourceEvent, TransactionLocation};
use bridge_relay::webhooks::RecordingSink;
use common::{
    observer_config, test_observer, webhook_body, webhook_event, IndexedCatchUp, StaticCatchUp,
    MONITOR_KEY, RECIPIENT, WATCHED,
};
use tokio::sync::broadcast;
use tower::ServiceExt;

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn post_json(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_push_relay_end_to_end() {
    let harness = test_observer();
    let monitor = PushMonitor::new(
        WATCHED,
        None,
        Arc::new(StaticCatchUp(Some(Vec::new()))),
        PushMonitorConfig {
            drain_interval: Duration::from_millis(10),
            ..PushMonitorConfig::default()
        },
    );

    let state = AppState::new(MonitorKind::Push, MONITOR_KEY, harness.store.clone())
        .with_ingress(monitor.ingress(), None);
    let app = relay_router(state, "/");

    // Deliveries land before the first drain, so the duplicate is
    // collapsed in the pending set
    for body in [
        webhook_body(10, 0, "0xtx1", "1000", RECIPIENT),
        webhook_body(10, 0, "0xtx1", "1000", RECIPIENT),
        webhook_body(10, 1, "0xtx2", "0.5", RECIPIENT),
        webhook_body(11, 0, "0xtx3", "100", "not-an-address"),
    ] {
        let response = app.clone().oneshot(post_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let relay = tokio::spawn(Relay::new(harness.observer).run(monitor, shutdown_rx));

    let store = harness.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move {
            store.load(MONITOR_KEY).await.unwrap()
                == Some(TransactionLocation::new(
                    "0xblock11",
                    Some("0xtx3".to_string()),
                ))
        }
    })
    .await;

    shutdown_tx.send(()).unwrap();
    let stats = relay.await.unwrap().unwrap();

    assert_eq!(stats.minted, 1);
    assert_eq!(stats.refunded, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        *harness.executor.mints.lock().await,
        vec![(RECIPIENT.to_string(), 990 * 10u128.pow(18))]
    );
    assert_eq!(harness.executor.refunds.lock().await.len(), 2);
    assert_eq!(harness.sink.messages().await.len(), 3);
}

/// Chain whose blocks never contain events
struct EmptyChain {
    tip: u64,
    /// Hashes that resolve to an index without being canonical there
    stale: HashMap<String, u64>,
}

fn hash(index: u64) -> BlockHash {
    format!("0x{index:04}")
}

#[async_trait]
impl EventSource for EmptyChain {
    async fn block_index(&self, block_hash: &str) -> anyhow::Result<u64> {
        if let Some(index) = self.stale.get(block_hash) {
            return Ok(*index);
        }
        block_hash
            .trim_start_matches("0x")
            .parse()
            .map_err(|_| anyhow!("unknown block {block_hash}"))
    }

    async fn tip_index(&self) -> anyhow::Result<u64> {
        Ok(self.tip)
    }

    async fn block_hash(&self, index: u64) -> anyhow::Result<BlockHash> {
        Ok(hash(index))
    }

    async fn events_for_block(&self, _: &str, _: &str) -> anyhow::Result<Vec<SourceEvent>> {
        Ok(Vec::new())
    }
}

fn pull_config() -> PullMonitorConfig {
    PullMonitorConfig {
        confirmations: 2,
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
    }
}

#[tokio::test]
async fn test_pull_relay_advances_over_empty_blocks() {
    let harness = test_observer();
    let chain = Arc::new(EmptyChain {
        tip: 12,
        stale: HashMap::new(),
    });
    let monitor = PullMonitor::new(chain, TransactionLocation::block(hash(5)), WATCHED, pull_config());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let relay = tokio::spawn(Relay::new(harness.observer).run(monitor, shutdown_rx));

    let store = harness.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move {
            store.load(MONITOR_KEY).await.unwrap() == Some(TransactionLocation::block(hash(10)))
        }
    })
    .await;

    shutdown_tx.send(()).unwrap();
    let stats = relay.await.unwrap().unwrap();
    assert_eq!(stats.batches, 5);

    // Never past tip - confirmations
    let history = harness.store.history().await;
    assert_eq!(history.len(), 5);
    assert!(history
        .iter()
        .all(|(_, cursor)| cursor.block_hash <= hash(10)));
}

#[tokio::test]
async fn test_pull_relay_stops_on_stale_cursor() {
    let harness = test_observer();
    let chain = Arc::new(EmptyChain {
        tip: 12,
        stale: HashMap::from([("0xforked".to_string(), 5)]),
    });
    let monitor = PullMonitor::new(
        chain,
        TransactionLocation::block("0xforked"),
        WATCHED,
        pull_config(),
    );

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let error = Relay::new(harness.observer)
        .run(monitor, shutdown_rx)
        .await
        .unwrap_err();

    assert!(error.is_fatal());
    assert!(harness.store.history().await.is_empty());
}

fn push_config() -> PushMonitorConfig {
    PushMonitorConfig {
        drain_interval: Duration::from_millis(10),
        ..PushMonitorConfig::default()
    }
}

#[tokio::test]
async fn test_late_webhook_does_not_rewind_cursor() {
    let harness = test_observer();
    let monitor = PushMonitor::new(
        WATCHED,
        None,
        Arc::new(StaticCatchUp(Some(Vec::new()))),
        push_config(),
    );
    let state = AppState::new(MonitorKind::Push, MONITOR_KEY, harness.store.clone())
        .with_ingress(monitor.ingress(), None);
    let app = relay_router(state, "/");

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let relay = tokio::spawn(Relay::new(harness.observer).run(monitor, shutdown_rx));

    let newest = TransactionLocation::new("0xblock5", Some("0xnew".to_string()));
    let response = app
        .clone()
        .oneshot(post_json(webhook_body(5, 0, "0xnew", "100", RECIPIENT)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let store = harness.store.clone();
    let expected = newest.clone();
    wait_for(|| {
        let store = store.clone();
        let expected = expected.clone();
        async move { store.load(MONITOR_KEY).await.unwrap() == Some(expected) }
    })
    .await;

    // Delivered after block 5 was already settled
    let response = app
        .clone()
        .oneshot(post_json(webhook_body(4, 0, "0xlate", "200", RECIPIENT)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let executor = harness.executor.clone();
    wait_for(|| {
        let executor = executor.clone();
        async move { executor.mints.lock().await.len() == 2 }
    })
    .await;

    shutdown_tx.send(()).unwrap();
    let stats = relay.await.unwrap().unwrap();
    assert_eq!(stats.minted, 2);
    assert_eq!(harness.store.load(MONITOR_KEY).await.unwrap(), Some(newest.clone()));

    // A restart resumes from block 5 and settles nothing twice
    let observer = ExchangeObserver::new(
        harness.executor.clone(),
        harness.executor.clone(),
        harness.store.clone(),
        Arc::new(harness.sink.clone()),
        observer_config(),
    );
    let catch_up = IndexedCatchUp(vec![
        webhook_event(4, 0, "0xlate", "200"),
        webhook_event(5, 0, "0xnew", "100"),
    ]);
    let monitor = PushMonitor::new(WATCHED, Some(newest.clone()), Arc::new(catch_up), push_config());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let relay = tokio::spawn(Relay::new(observer).run(monitor, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(()).unwrap();
    let stats = relay.await.unwrap().unwrap();

    assert_eq!(stats.batches, 0);
    assert_eq!(harness.executor.mints.lock().await.len(), 2);
    assert_eq!(harness.store.load(MONITOR_KEY).await.unwrap(), Some(newest));
}

/// Store whose disk is permanently full
struct FullDisk;

#[async_trait]
impl StateStore for FullDisk {
    async fn store(&self, _: &str, _: &TransactionLocation) -> anyhow::Result<()> {
        Err(anyhow!("no space left on device"))
    }

    async fn load(&self, _: &str) -> anyhow::Result<Option<TransactionLocation>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_relay_stops_when_cursor_cannot_be_persisted() {
    let harness = test_observer();
    let observer = ExchangeObserver::new(
        harness.executor.clone(),
        harness.executor.clone(),
        Arc::new(FullDisk),
        Arc::new(RecordingSink::new()),
        ObserverConfig {
            max_cursor_failures: 2,
            ..observer_config()
        },
    );
    let monitor = PushMonitor::new(
        WATCHED,
        None,
        Arc::new(StaticCatchUp(Some(Vec::new()))),
        push_config(),
    );
    let ingress = monitor.ingress();
    for log_index in 0..4 {
        ingress
            .ingest(webhook_event(7, log_index, &format!("0xtx{log_index}"), "100"))
            .await;
    }

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let error = tokio::time::timeout(
        Duration::from_secs(5),
        Relay::new(observer).run(monitor, shutdown_rx),
    )
    .await
    .expect("relay kept running")
    .unwrap_err();

    assert!(error.is_fatal());
    assert!(matches!(error, RelayError::PersistenceHalted { failures: 2 }));
    assert_eq!(harness.executor.mints.lock().await.len(), 2);
}
