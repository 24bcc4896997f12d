// Common types shared by the monitors, the observer and the adapters

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::address::DestinationAddress;

/// Hex-encoded block hash on the source chain
pub type BlockHash = String;

/// Transaction id on the source chain
pub type TxId = String;

/// The last confirmed processing position of a monitor.
///
/// `tx_id` is `None` when the whole block was processed without any event
/// (an empty batch), otherwise it names the last event settled in the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLocation {
    pub block_hash: BlockHash,
    pub tx_id: Option<TxId>,
}

impl TransactionLocation {
    pub fn new(block_hash: impl Into<BlockHash>, tx_id: Option<TxId>) -> Self {
        Self {
            block_hash: block_hash.into(),
            tx_id,
        }
    }

    /// Cursor marking a block that was fully processed
    pub fn block(block_hash: impl Into<BlockHash>) -> Self {
        Self::new(block_hash, None)
    }
}

/// A deposit observed on the source chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEvent {
    pub block_hash: BlockHash,
    pub tx_id: TxId,
    pub source_address: String,
    pub sender: String,
    /// Exact decimal amount kept as text until validation
    pub amount: String,
    /// Recipient candidate on the destination chain
    pub memo: Option<String>,
}

impl SourceEvent {
    pub fn location(&self) -> TransactionLocation {
        TransactionLocation::new(self.block_hash.clone(), Some(self.tx_id.clone()))
    }
}

/// All events of one block handed from a monitor to the observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBatch {
    pub block_hash: BlockHash,
    pub events: Vec<SourceEvent>,
    /// `false` for events that arrived after later events were already
    /// handed out; settling them must not move the cursor backwards
    #[serde(default = "advances_cursor")]
    pub advances_cursor: bool,
}

fn advances_cursor() -> bool {
    true
}

impl BlockBatch {
    pub fn new(block_hash: impl Into<BlockHash>, events: Vec<SourceEvent>) -> Self {
        Self {
            block_hash: block_hash.into(),
            events,
            advances_cursor: true,
        }
    }

    /// Batch of events older than the newest position already handed out
    pub fn late(block_hash: impl Into<BlockHash>, events: Vec<SourceEvent>) -> Self {
        Self {
            advances_cursor: false,
            ..Self::new(block_hash, events)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Inclusive bounds on the amount a single event may exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitationPolicy {
    pub minimum: Decimal,
    pub maximum: Decimal,
}

impl LimitationPolicy {
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.minimum && amount <= self.maximum
    }
}

/// Why an event was routed to the refund path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    MissingRecipient,
    InvalidRecipient { recipient: String },
    InvalidAmount { amount: String },
    BelowMinimum { amount: Decimal, minimum: Decimal },
    AboveMaximum { amount: Decimal, maximum: Decimal },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingRecipient => write!(f, "memo does not carry a recipient"),
            Rejection::InvalidRecipient { recipient } => {
                write!(f, "recipient {recipient} is not a valid destination address")
            }
            Rejection::InvalidAmount { amount } => write!(f, "amount {amount} is not a decimal"),
            Rejection::BelowMinimum { amount, minimum } => {
                write!(f, "amount {amount} is below the minimum {minimum}")
            }
            Rejection::AboveMaximum { amount, maximum } => {
                write!(f, "amount {amount} is above the maximum {maximum}")
            }
        }
    }
}

/// An event that passed validation and is ready to be minted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedExchange {
    pub recipient: DestinationAddress,
    pub amount: Decimal,
}

/// What happened to a single event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExchangeOutcome {
    Refunded {
        reason: Rejection,
        refund_tx_id: TxId,
    },
    Minted {
        destination_tx_hash: String,
        fee_charged: Decimal,
        net_amount: Decimal,
    },
    Failed {
        error: String,
    },
}

impl ExchangeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ExchangeOutcome::Refunded { .. } => "refunded",
            ExchangeOutcome::Minted { .. } => "minted",
            ExchangeOutcome::Failed { .. } => "failed",
        }
    }
}
