//! The exchange engine: turns each block batch into mints and refunds.
//!
//! Events are handled strictly in order. The cursor is persisted after every
//! settled event, so a restart resumes right after the last event that
//! reached the destination or was refunded. A failure of one event is
//! reported and never stops the rest of the batch, unless the cursor itself
//! keeps failing to persist: then dispatching stops until the relay is
//! restarted.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::RelayError;
use crate::metrics::collectors as relay_metrics;
use crate::store::StateStore;
use crate::types::{
    BlockBatch, ExchangeOutcome, Rejection, SourceEvent, TransactionLocation, ValidatedExchange,
};
use crate::webhooks::{
    ExplorerLinks, NotificationSink, RefundEvent, WrappedEvent, WrappingFailureEvent,
};

pub mod dispatch;
pub mod exchange;


pub use dispatch::{DestinationMinter, MintReceipt, SourceTransfer};
pub use exchange::{compute_exchange, validate, ExchangeAmounts, ExchangeConfig, ExchangeError};

pub const DEFAULT_MONITOR_KEY: &str = "nineChronicles";
pub const DEFAULT_CHANNEL: &str = "#nine-chronicles-bridge-bot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Key the cursor is stored under
    pub monitor_key: String,
    /// Notification channel
    pub channel: String,
    pub exchange: ExchangeConfig,
    pub links: ExplorerLinks,
    /// Consecutive failed cursor writes after which nothing more is dispatched
    pub max_cursor_failures: u32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            monitor_key: DEFAULT_MONITOR_KEY.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            exchange: ExchangeConfig::default(),
            links: ExplorerLinks::default(),
            max_cursor_failures: 3,
        }
    }
}

pub struct ExchangeObserver {
    minter: Arc<dyn DestinationMinter>,
    refunder: Arc<dyn SourceTransfer>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn NotificationSink>,
    config: ObserverConfig,
    cursor_failures: AtomicU32,
}

impl ExchangeObserver {
    pub fn new(
        minter: Arc<dyn DestinationMinter>,
        refunder: Arc<dyn SourceTransfer>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn NotificationSink>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            minter,
            refunder,
            store,
            notifier,
            config,
            cursor_failures: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    /// Process every event of `batch`, returning one outcome per event
    /// dispatched.
    ///
    /// Events of a batch that does not advance the cursor are settled
    /// without touching the persisted cursor.
    #[instrument(skip_all, fields(block_hash = %batch.block_hash, events = batch.events.len()))]
    pub async fn observe(&self, batch: &BlockBatch) -> Vec<ExchangeOutcome> {
        if batch.is_empty() {
            // Nothing to settle; only move the cursor past the block
            if batch.advances_cursor {
                let cursor = TransactionLocation::block(batch.block_hash.clone());
                if let Err(e) = self.persist(&cursor).await {
                    error!(error = %e, "Failed to persist cursor for empty block");
                }
            }
            return Vec::new();
        }

        if !batch.advances_cursor {
            warn!(
                events = batch.events.len(),
                "Settling events that arrived behind the cursor, leaving the cursor in place"
            );
        }

        let mut outcomes = Vec::with_capacity(batch.events.len());
        for (position, event) in batch.events.iter().enumerate() {
            if let Some(e) = self.halted() {
                error!(
                    error = %e,
                    skipped = batch.events.len() - position,
                    "Cursor cannot be persisted, not dispatching the rest of the batch"
                );
                break;
            }
            let outcome = self.settle(event, batch.advances_cursor).await;
            relay_metrics::record_exchange_outcome(outcome.label());
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Fatal error once the cursor failed to persist
    /// `max_cursor_failures` times in a row
    pub fn halted(&self) -> Option<RelayError> {
        let failures = self.cursor_failures.load(Ordering::Relaxed);
        (failures >= self.config.max_cursor_failures)
            .then_some(RelayError::PersistenceHalted { failures })
    }

    /// Settle a single event and move the cursor to it. Never fails: errors
    /// become [`ExchangeOutcome::Failed`] and a failure notification.
    pub async fn process(&self, event: &SourceEvent) -> ExchangeOutcome {
        self.settle(event, true).await
    }

    async fn settle(&self, event: &SourceEvent, advance_cursor: bool) -> ExchangeOutcome {
        let result = match validate(event, &self.config.exchange.limits()) {
            Ok(validated) => self.exchange(event, validated, advance_cursor).await,
            Err(rejection) => self.refund(event, rejection, advance_cursor).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    tx_id = %event.tx_id,
                    sender = %event.sender,
                    amount = %event.amount,
                    error = %e,
                    "Failed to process event"
                );
                let error = format!("{e:#}");
                let recipient = event.memo.as_deref().unwrap_or("null");
                let message = WrappingFailureEvent {
                    links: &self.config.links,
                    sender: &event.sender,
                    recipient,
                    amount: &event.amount,
                    source_tx_id: &event.tx_id,
                    error: &error,
                }
                .render();
                self.send(message).await;
                ExchangeOutcome::Failed { error }
            }
        }
    }

    async fn refund(
        &self,
        event: &SourceEvent,
        rejection: Rejection,
        advance_cursor: bool,
    ) -> Result<ExchangeOutcome, RelayError> {
        warn!(
            tx_id = %event.tx_id,
            sender = %event.sender,
            reason = %rejection,
            "Rejected event, refunding"
        );

        let refund_tx_id = self
            .refunder
            .transfer(&event.sender, &event.amount, &self.config.exchange.refund_memo)
            .await
            .map_err(|e| RelayError::dispatch("refund", e))?;

        info!(tx_id = %event.tx_id, refund_tx_id = %refund_tx_id, "Refunded event");
        if advance_cursor {
            self.persist(&event.location()).await?;
        }

        let reason = rejection.to_string();
        let message = RefundEvent {
            links: &self.config.links,
            sender: &event.sender,
            amount: &event.amount,
            reason: &reason,
            source_tx_id: &event.tx_id,
            refund_tx_id: &refund_tx_id,
        }
        .render();
        self.send(message).await;

        Ok(ExchangeOutcome::Refunded {
            reason: rejection,
            refund_tx_id,
        })
    }

    async fn exchange(
        &self,
        event: &SourceEvent,
        validated: ValidatedExchange,
        advance_cursor: bool,
    ) -> Result<ExchangeOutcome, RelayError> {
        let exchange = &self.config.exchange;
        let amounts = compute_exchange(
            validated.amount,
            exchange.fee_ratio,
            exchange.destination_decimals,
        )
        .map_err(|e| RelayError::dispatch("mint", e))?;

        let receipt = self
            .minter
            .mint(&validated.recipient, amounts.scaled)
            .await
            .map_err(|e| RelayError::dispatch("mint", e))?;

        info!(
            tx_id = %event.tx_id,
            recipient = %validated.recipient,
            net_amount = %amounts.net,
            fee = %amounts.fee,
            destination_tx_hash = %receipt.transaction_hash,
            "Minted wrapped tokens"
        );

        if advance_cursor {
            if let Err(e) = self.persist(&event.location()).await {
                // The mint already happened; keep its hash next to the failure
                error!(
                    tx_id = %event.tx_id,
                    destination_tx_hash = %receipt.transaction_hash,
                    "Minted but failed to persist cursor"
                );
                return Err(e);
            }
        }

        let message = WrappedEvent {
            links: &self.config.links,
            sender: &event.sender,
            recipient: validated.recipient.as_str(),
            amount: amounts.net,
            fee: amounts.fee,
            source_tx_id: &event.tx_id,
            destination_tx_hash: &receipt.transaction_hash,
        }
        .render();
        self.send(message).await;

        Ok(ExchangeOutcome::Minted {
            destination_tx_hash: receipt.transaction_hash,
            fee_charged: amounts.fee,
            net_amount: amounts.net,
        })
    }

    async fn persist(&self, cursor: &TransactionLocation) -> Result<(), RelayError> {
        let result = self.store.store(&self.config.monitor_key, cursor).await;
        relay_metrics::record_cursor_write(result.is_ok());
        match result {
            Ok(()) => {
                self.cursor_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.cursor_failures.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::Store(e))
            }
        }
    }

    async fn send(&self, message: serde_json::Value) {
        if let Err(e) = self.notifier.notify(&self.config.channel, message).await {
            warn!(channel = %self.config.channel, error = %e, "Failed to queue notification");
        }
    }
}
