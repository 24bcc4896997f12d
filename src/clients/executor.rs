use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{error_for_status, http_client, join};
use crate::address::DestinationAddress;
use crate::observer::{DestinationMinter, MintReceipt, SourceTransfer};
use crate::types::TxId;

#[derive(Debug, Serialize)]
struct MintRequest<'a> {
    recipient: &'a str,
    /// Base units as a decimal string; too large for a JSON number
    amount: String,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    recipient: &'a str,
    amount: &'a str,
    memo: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    tx_id: TxId,
}

/// Client of the signing service that owns the bridge's keys on both chains
#[derive(Debug, Clone)]
pub struct ExecutorClient {
    client: Client,
    endpoint: String,
}

impl ExecutorClient {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DestinationMinter for ExecutorClient {
    #[instrument(skip(self), fields(recipient = %recipient))]
    async fn mint(
        &self,
        recipient: &DestinationAddress,
        amount: u128,
    ) -> anyhow::Result<MintReceipt> {
        let response = self
            .client
            .post(join(&self.endpoint, "mint"))
            .json(&MintRequest {
                recipient: recipient.as_str(),
                amount: amount.to_string(),
            })
            .send()
            .await?;

        let receipt: MintReceipt = error_for_status(response)
            .await?
            .json()
            .await
            .context("malformed mint receipt")?;

        info!(transaction_hash = %receipt.transaction_hash, "Mint submitted");
        Ok(receipt)
    }
}

#[async_trait]
impl SourceTransfer for ExecutorClient {
    #[instrument(skip(self, memo))]
    async fn transfer(&self, recipient: &str, amount: &str, memo: &str) -> anyhow::Result<TxId> {
        let response = self
            .client
            .post(join(&self.endpoint, "transfer"))
            .json(&TransferRequest {
                recipient,
                amount,
                memo,
            })
            .send()
            .await?;

        let body: TransferResponse = error_for_status(response)
            .await?
            .json()
            .await
            .context("malformed transfer response")?;

        Ok(body.tx_id)
    }
}
