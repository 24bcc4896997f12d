use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::DestinationAddress;
use crate::types::TxId;

/// Receipt of a mint on the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    pub transaction_hash: String,
}

/// Mints wrapped tokens on the destination chain
#[async_trait]
pub trait DestinationMinter: Send + Sync {
    /// Mint `amount` base units to `recipient`
    async fn mint(&self, recipient: &DestinationAddress, amount: u128)
        -> anyhow::Result<MintReceipt>;
}

/// Sends funds back on the source chain
#[async_trait]
pub trait SourceTransfer: Send + Sync {
    /// Transfer `amount` (exact decimal text) to `recipient` with `memo`,
    /// returning the source transaction id
    async fn transfer(&self, recipient: &str, amount: &str, memo: &str) -> anyhow::Result<TxId>;
}
