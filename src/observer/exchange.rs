use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::DestinationAddress;
use crate::types::{LimitationPolicy, Rejection, SourceEvent, ValidatedExchange};

/// Largest scale a `Decimal` supports
pub const MAX_DESTINATION_DECIMALS: u32 = 28;

/// Decimal places the fee is rounded to
const FEE_DECIMAL_PLACES: u32 = 2;

pub const DEFAULT_REFUND_MEMO: &str =
    "I'm bridge and you should transfer with memo, valid ethereum address to receive.";

/// Pricing and limits of the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExchangeConfig {
    /// Share of the amount kept as fee, e.g. 0.01 for 1%
    #[serde(default = "default_fee_ratio")]
    pub fee_ratio: Decimal,
    #[serde(default = "default_minimum")]
    pub minimum: Decimal,
    #[serde(default = "default_maximum")]
    pub maximum: Decimal,
    /// Decimals of the wrapped token on the destination chain
    #[serde(default = "default_destination_decimals")]
    pub destination_decimals: u32,
    /// Memo attached to refunds
    #[serde(default = "default_refund_memo")]
    pub refund_memo: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            fee_ratio: default_fee_ratio(),
            minimum: default_minimum(),
            maximum: default_maximum(),
            destination_decimals: default_destination_decimals(),
            refund_memo: default_refund_memo(),
        }
    }
}

fn default_fee_ratio() -> Decimal {
    Decimal::new(1, 2)
}

fn default_minimum() -> Decimal {
    Decimal::new(100, 0)
}

fn default_maximum() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_destination_decimals() -> u32 {
    18
}

fn default_refund_memo() -> String {
    DEFAULT_REFUND_MEMO.to_string()
}

impl ExchangeConfig {
    pub fn limits(&self) -> LimitationPolicy {
        LimitationPolicy {
            minimum: self.minimum,
            maximum: self.maximum,
        }
    }
}

/// Amounts of a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeAmounts {
    pub fee: Decimal,
    pub net: Decimal,
    /// `net` in destination base units
    pub scaled: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("amount {0} leaves nothing to mint after the fee")]
    NothingToMint(Decimal),
    #[error("amount {net} cannot be expressed in {decimals} decimals")]
    Unrepresentable { net: Decimal, decimals: u32 },
    #[error("fee computation overflowed for amount {0}")]
    Overflow(Decimal),
}

/// Check the recipient and amount of a source event
pub fn validate(
    event: &SourceEvent,
    limits: &LimitationPolicy,
) -> Result<ValidatedExchange, Rejection> {
    let memo = event
        .memo
        .as_deref()
        .filter(|memo| !memo.is_empty())
        .ok_or(Rejection::MissingRecipient)?;

    let recipient =
        DestinationAddress::parse(memo).map_err(|_| Rejection::InvalidRecipient {
            recipient: memo.to_string(),
        })?;

    let invalid_amount = || Rejection::InvalidAmount {
        amount: event.amount.clone(),
    };
    if !is_plain_decimal(&event.amount) {
        return Err(invalid_amount());
    }
    let amount = Decimal::from_str_exact(&event.amount).map_err(|_| invalid_amount())?;

    if amount < limits.minimum {
        return Err(Rejection::BelowMinimum {
            amount,
            minimum: limits.minimum,
        });
    }
    if amount > limits.maximum {
        return Err(Rejection::AboveMaximum {
            amount,
            maximum: limits.maximum,
        });
    }

    Ok(ValidatedExchange { recipient, amount })
}

/// Whether `text` is an optionally negative run of digits with an optional
/// fractional part, nothing else: no sign `+`, separators, exponent or
/// surrounding whitespace
fn is_plain_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());

    digits(whole) && fraction.map_or(true, digits)
}

/// Split `amount` into fee and net, and scale the net amount to base units.
///
/// The fee is rounded half away from zero to two decimal places.
pub fn compute_exchange(
    amount: Decimal,
    fee_ratio: Decimal,
    destination_decimals: u32,
) -> Result<ExchangeAmounts, ExchangeError> {
    let fee = amount
        .checked_mul(fee_ratio)
        .ok_or(ExchangeError::Overflow(amount))?
        .round_dp_with_strategy(FEE_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero);
    let net = amount - fee;

    if net <= Decimal::ZERO {
        return Err(ExchangeError::NothingToMint(amount));
    }

    let scaled = scale_to_base_units(net, destination_decimals)?;
    Ok(ExchangeAmounts { fee, net, scaled })
}

fn scale_to_base_units(net: Decimal, decimals: u32) -> Result<u128, ExchangeError> {
    let unrepresentable = || ExchangeError::Unrepresentable { net, decimals };

    let normalized = net.normalize();
    let mantissa = u128::try_from(normalized.mantissa()).map_err(|_| unrepresentable())?;
    let scale = normalized.scale();

    if scale > decimals {
        return Err(unrepresentable());
    }

    10u128
        .checked_pow(decimals - scale)
        .and_then(|factor| mantissa.checked_mul(factor))
        .ok_or_else(unrepresentable)
}
