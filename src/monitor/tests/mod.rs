#![allow(clippy::unwrap_used)]
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use super::{BatchStream, RetryPolicy, WebhookEvent};
use crate::error::RelayError;
use crate::types::BlockBatch;

mod pull_tests;

const WATCHED: &str = "0x9093dd96c4bb6b44a9e0a522e2de49641f146223";

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

/// Next item of the stream, or `None` if nothing arrives within `wait`
async fn next_within(
    stream: &mut BatchStream,
    wait: Duration,
) -> Option<Result<BlockBatch, RelayError>> {
    tokio::time::timeout(wait, stream.next())
        .await
        .ok()
        .flatten()
}

fn webhook_event(block_index: u64, log_index: u64, tx: &str) -> WebhookEvent {
    serde_json::from_value(json!({
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
                "amount": "100",
                "recipient": "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
            },
            "ordered": []
        }
    }))
    .unwrap()
}
