use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const COLOR_SUCCESS: &str = "#42f5aa";
const COLOR_REFUND: &str = "#f5c542";
const COLOR_FAILURE: &str = "#ff0033";

/// Base URLs of the block explorers linked from notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExplorerLinks {
    /// Source chain explorer, e.g. `https://explorer.libplanet.io/9c-main`
    #[serde(default)]
    pub explorer_url: String,
    /// Destination chain explorer, e.g. `https://etherscan.io`
    #[serde(default)]
    pub destination_explorer_url: String,
}

impl ExplorerLinks {
    pub fn source_tx(&self, tx_id: &str) -> String {
        format!(
            "{}/transaction?{}",
            self.explorer_url.trim_end_matches('/'),
            tx_id
        )
    }

    pub fn destination_tx(&self, tx_hash: &str) -> String {
        format!(
            "{}/tx/{}",
            self.destination_explorer_url.trim_end_matches('/'),
            tx_hash
        )
    }
}

fn field(title: &str, value: impl Into<String>) -> Value {
    json!({ "title": title, "value": value.into() })
}

fn render(text: &str, color: &str, fields: Vec<Value>) -> Value {
    json!({
        "text": text,
        "attachments": [{
            "author_name": "Bridge Event",
            "color": color,
            "fields": fields,
        }]
    })
}

/// A source transfer was exchanged into destination tokens
#[derive(Debug, Clone)]
pub struct WrappedEvent<'a> {
    pub links: &'a ExplorerLinks,
    pub sender: &'a str,
    pub recipient: &'a str,
    pub amount: Decimal,
    pub fee: Decimal,
    pub source_tx_id: &'a str,
    pub destination_tx_hash: &'a str,
}

impl WrappedEvent<'_> {
    pub fn render(&self) -> Value {
        render(
            "NCG → wNCG event occurred.",
            COLOR_SUCCESS,
            vec![
                field("9c network transaction", self.links.source_tx(self.source_tx_id)),
                field(
                    "Ethereum network transaction",
                    self.links.destination_tx(self.destination_tx_hash),
                ),
                field("sender (NineChronicles)", self.sender),
                field("recipient (Ethereum)", self.recipient),
                field("amount", self.amount.to_string()),
                field("fee", self.fee.to_string()),
            ],
        )
    }
}

/// A source transfer was returned to its sender
#[derive(Debug, Clone)]
pub struct RefundEvent<'a> {
    pub links: &'a ExplorerLinks,
    pub sender: &'a str,
    pub amount: &'a str,
    pub reason: &'a str,
    pub source_tx_id: &'a str,
    pub refund_tx_id: &'a str,
}

impl RefundEvent<'_> {
    pub fn render(&self) -> Value {
        render(
            "NCG refund event occurred.",
            COLOR_REFUND,
            vec![
                field("9c network transaction", self.links.source_tx(self.source_tx_id)),
                field("refund transaction", self.links.source_tx(self.refund_tx_id)),
                field("sender (NineChronicles)", self.sender),
                field("amount", self.amount),
                field("reason", self.reason),
            ],
        )
    }
}

/// Processing of a source transfer failed and needs an operator
#[derive(Debug, Clone)]
pub struct WrappingFailureEvent<'a> {
    pub links: &'a ExplorerLinks,
    pub sender: &'a str,
    pub recipient: &'a str,
    pub amount: &'a str,
    pub source_tx_id: &'a str,
    pub error: &'a str,
}

impl WrappingFailureEvent<'_> {
    pub fn render(&self) -> Value {
        render(
            "NCG → wNCG event failed.",
            COLOR_FAILURE,
            vec![
                field("9c network transaction", self.links.source_tx(self.source_tx_id)),
                field("sender (NineChronicles)", self.sender),
                field("recipient (Ethereum)", self.recipient),
                field("amount", self.amount),
                field("error", self.error),
            ],
        )
    }
}
