use std::fmt;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ADDRESS_HEX_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must have {ADDRESS_HEX_LEN} hex digits, found {0}")]
    InvalidLength(usize),
    #[error("address contains non-hex characters")]
    NotHex,
    #[error("address checksum does not match")]
    BadChecksum,
    #[error("the zero address cannot receive funds")]
    Zero,
}

/// A recipient on the destination chain.
///
/// Constructed only through [`DestinationAddress::parse`], so holding one
/// means the address is well-formed, correctly checksummed when mixed-case,
/// and not the zero address. The text is kept as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationAddress {
    text: String,
    address: Address,
}

impl DestinationAddress {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let body = input
            .strip_prefix("0x")
            .ok_or(AddressError::MissingPrefix)?;

        if body.len() != ADDRESS_HEX_LEN {
            return Err(AddressError::InvalidLength(body.len()));
        }

        // Single-case bodies carry no checksum
        let mixed_case = body.chars().any(|c| c.is_ascii_lowercase())
            && body.chars().any(|c| c.is_ascii_uppercase());
        let address = if mixed_case {
            Address::parse_checksummed(input, None).map_err(|e| match e {
                alloy_primitives::AddressError::InvalidChecksum => AddressError::BadChecksum,
                _ => AddressError::NotHex,
            })?
        } else {
            Address::from_str(input).map_err(|_| AddressError::NotHex)?
        };

        if address.is_zero() {
            return Err(AddressError::Zero);
        }

        Ok(Self {
            text: input.to_string(),
            address,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-55 mixed-case rendering of this address
    pub fn to_checksum(&self) -> String {
        self.address.to_checksum(None)
    }
}

impl FromStr for DestinationAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DestinationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for DestinationAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for DestinationAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
