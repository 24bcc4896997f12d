use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{error_for_status, http_client};
use crate::monitor::EventSource;
use crate::types::{BlockHash, SourceEvent};

const BLOCK_INDEX_QUERY: &str =
    "query GetBlockIndex($hash: ID!) { chainQuery { blockQuery { block(hash: $hash) { index } } } }";

const BLOCK_HASH_QUERY: &str =
    "query GetBlockHash($index: ID!) { chainQuery { blockQuery { block(index: $index) { hash } } } }";

const TIP_INDEX_QUERY: &str = "query GetTipIndex { nodeStatus { tip { index } } }";

const TRANSFERS_QUERY: &str = "query GetNCGTransferredEvents($blockHash: ByteString!, $recipient: Address!) { \
     transferNCGHistories(blockHash: $blockHash, recipient: $recipient) { \
     blockHash txId sender recipient amount memo } }";

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainQuery<T> {
    chain_query: BlockQuery<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockQuery<T> {
    block_query: BlockField<T>,
}

#[derive(Debug, Deserialize)]
struct BlockField<T> {
    block: Option<T>,
}

#[derive(Debug, Deserialize)]
struct IndexField {
    index: u64,
}

#[derive(Debug, Deserialize)]
struct HashField {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeStatus {
    node_status: Tip,
}

#[derive(Debug, Deserialize)]
struct Tip {
    tip: IndexField,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferHistories {
    #[serde(rename = "transferNCGHistories")]
    histories: Vec<TransferHistory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferHistory {
    block_hash: String,
    tx_id: String,
    sender: String,
    recipient: String,
    amount: String,
    memo: Option<String>,
}

/// [`EventSource`] backed by a headless node's GraphQL endpoint
#[derive(Debug, Clone)]
pub struct GraphQlEventSource {
    client: Client,
    endpoint: String,
}

impl GraphQlEventSource {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
        })
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> anyhow::Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let body: GraphQlResponse<T> = error_for_status(response)
            .await?
            .json()
            .await
            .context("malformed GraphQL response")?;

        if let Some(error) = body.errors.first() {
            return Err(anyhow!("GraphQL error: {}", error.message));
        }
        body.data
            .ok_or_else(|| anyhow!("GraphQL response carries no data"))
    }
}

#[async_trait]
impl EventSource for GraphQlEventSource {
    #[instrument(skip(self))]
    async fn block_index(&self, block_hash: &str) -> anyhow::Result<u64> {
        let data: ChainQuery<IndexField> = self
            .query(BLOCK_INDEX_QUERY, json!({ "hash": block_hash }))
            .await?;
        data.chain_query
            .block_query
            .block
            .map(|block| block.index)
            .ok_or_else(|| anyhow!("block {block_hash} not found"))
    }

    async fn tip_index(&self) -> anyhow::Result<u64> {
        let data: NodeStatus = self.query(TIP_INDEX_QUERY, json!({})).await?;
        Ok(data.node_status.tip.index)
    }

    #[instrument(skip(self))]
    async fn block_hash(&self, index: u64) -> anyhow::Result<BlockHash> {
        let data: ChainQuery<HashField> = self
            .query(BLOCK_HASH_QUERY, json!({ "index": index.to_string() }))
            .await?;
        data.chain_query
            .block_query
            .block
            .map(|block| block.hash)
            .ok_or_else(|| anyhow!("block {index} not found"))
    }

    #[instrument(skip(self))]
    async fn events_for_block(
        &self,
        block_hash: &str,
        watched_address: &str,
    ) -> anyhow::Result<Vec<SourceEvent>> {
        let data: TransferHistories = self
            .query(
                TRANSFERS_QUERY,
                json!({ "blockHash": block_hash, "recipient": watched_address }),
            )
            .await?;

        debug!(count = data.histories.len(), "Fetched transfer histories");

        Ok(data
            .histories
            .into_iter()
            .map(|history| SourceEvent {
                block_hash: history.block_hash,
                tx_id: history.tx_id,
                source_address: history.recipient,
                sender: history.sender,
                amount: history.amount,
                memo: history.memo,
            })
            .collect())
    }
}
