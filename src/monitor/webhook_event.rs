use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::SourceEvent;

/// Largest power of ten `Decimal` can represent as a scale
const MAX_AMOUNT_DECIMALS: u32 = 28;

/// One contract event as delivered by the webhook indexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub timestamp: String,
    pub block_index: u64,
    pub log_index: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub source_address: String,
    pub abi_hash: String,
    pub abi_signature: String,
    pub args: EventArguments,
}

/// Decoded ABI arguments of an event, by name and by position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventArguments {
    #[serde(default)]
    pub named: Map<String, Value>,
    #[serde(default)]
    pub ordered: Vec<Value>,
}

impl WebhookEvent {
    /// Decode a raw webhook body
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("event has no `{0}` argument")]
    MissingArgument(String),
    #[error("argument `{name}` is not a {expected}")]
    WrongType { name: String, expected: &'static str },
    #[error("amount {0} cannot be represented exactly")]
    AmountOutOfRange(String),
}

/// Names of the ABI arguments carrying the exchange request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArgumentMapping {
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_amount")]
    pub amount: String,
    #[serde(default = "default_recipient")]
    pub recipient: String,
    /// Decimals of the raw on-chain amount, e.g. 18 for wei-denominated
    /// token amounts
    #[serde(default)]
    pub amount_decimals: u32,
}

impl Default for ArgumentMapping {
    fn default() -> Self {
        Self {
            sender: default_sender(),
            amount: default_amount(),
            recipient: default_recipient(),
            amount_decimals: 0,
        }
    }
}

fn default_sender() -> String {
    "sender".to_string()
}

fn default_amount() -> String {
    "amount".to_string()
}

fn default_recipient() -> String {
    "recipient".to_string()
}

impl ArgumentMapping {
    pub fn to_source_event(&self, event: &WebhookEvent) -> Result<SourceEvent, MappingError> {
        let sender = match self.named(event, &self.sender)? {
            Value::String(sender) => sender.clone(),
            _ => {
                return Err(MappingError::WrongType {
                    name: self.sender.clone(),
                    expected: "string",
                })
            }
        };

        let amount = self.amount_text(self.named(event, &self.amount)?)?;

        // A missing or non-textual recipient is a validation problem for the
        // observer (it refunds), not a mapping failure.
        let memo = event
            .args
            .named
            .get(&self.recipient)
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(SourceEvent {
            block_hash: event.block_hash.clone(),
            tx_id: event.transaction_hash.clone(),
            source_address: event.source_address.clone(),
            sender,
            amount,
            memo,
        })
    }

    fn named<'a>(&self, event: &'a WebhookEvent, name: &str) -> Result<&'a Value, MappingError> {
        event
            .args
            .named
            .get(name)
            .ok_or_else(|| MappingError::MissingArgument(name.to_string()))
    }

    fn amount_text(&self, value: &Value) -> Result<String, MappingError> {
        let raw = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            _ => {
                return Err(MappingError::WrongType {
                    name: self.amount.clone(),
                    expected: "number",
                })
            }
        };

        if self.amount_decimals == 0 {
            return Ok(raw);
        }
        if self.amount_decimals > MAX_AMOUNT_DECIMALS {
            return Err(MappingError::AmountOutOfRange(raw));
        }

        let amount =
            Decimal::from_str(&raw).map_err(|_| MappingError::AmountOutOfRange(raw.clone()))?;
        let unit = Decimal::new(1, self.amount_decimals);
        let scaled = amount
            .checked_mul(unit)
            .ok_or_else(|| MappingError::AmountOutOfRange(raw.clone()))?;

        Ok(scaled.normalize().to_string())
    }
}
