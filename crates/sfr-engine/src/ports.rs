//! Seams between the engine and the outside world.
//!
//! # Contract
//!
//! The engine never talks to storage, the payment gateway or a mail relay
//! directly. It holds trait objects for each, injected at construction, so
//! the same Coordinator runs against Postgres in production and against the
//! in-memory doubles in tests.
//!
//! A [`LedgerTx`] is one database transaction. Every mutation in a
//! reconciliation goes through the same `LedgerTx`; dropping it without
//! [`LedgerTx::commit`] rolls all of them back.
//!
//! Conditional transitions return the number of rows they changed. `0` is
//! not an error: it means another caller already moved the row, and the
//! engine takes its no-op branch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sfr_schemas::{
    ClaimedNotification, FulfillmentTransition, Minor, NewNotification, NewPaymentLogEntry,
    NewStatusHistoryEntry, NotificationTemplate, Order, OrderItem, OutboxStatus,
    PaymentLogEntry, PaymentTransition, RefundTransition, StatusHistoryEntry,
};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{GatewayError, LedgerError};

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Read side of the order ledger, plus the entry point for transactions.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;

    async fn order_by_reference(&self, reference: &str) -> Result<Option<Order>, LedgerError>;

    async fn order_by_id(&self, order_id: Uuid) -> Result<Option<Order>, LedgerError>;

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, LedgerError>;

    /// Newest first.
    async fn recent_payment_logs(
        &self,
        reference: &str,
        limit: i64,
    ) -> Result<Vec<PaymentLogEntry>, LedgerError>;

    /// Oldest first.
    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LedgerError>;

    /// Claim up to `limit` pending notifications for `dispatcher`. Rows claimed
    /// by someone else more than `stale_after` ago are reclaimed. A row is
    /// handed to at most one dispatcher at a time.
    async fn claim_notifications(
        &self,
        limit: i64,
        dispatcher: &str,
        stale_after: Duration,
    ) -> Result<Vec<ClaimedNotification>, LedgerError>;

    /// `false` when the row is no longer claimed by `dispatcher`.
    async fn mark_notification_sent(&self, id: Uuid, dispatcher: &str)
        -> Result<bool, LedgerError>;

    /// Record a failed send. The row returns to `pending` with one more
    /// attempt, or becomes `failed` once `max_attempts` is reached.
    async fn release_notification(
        &self,
        id: Uuid,
        dispatcher: &str,
        error: &str,
        max_attempts: i32,
    ) -> Result<OutboxStatus, LedgerError>;
}

/// One ledger transaction.
#[async_trait]
pub trait LedgerTx: Send {
    async fn order_by_reference(&mut self, reference: &str) -> Result<Option<Order>, LedgerError>;

    async fn order_by_id(&mut self, order_id: Uuid) -> Result<Option<Order>, LedgerError>;

    /// `UPDATE .. WHERE payment_reference = ? AND payment_status = from`.
    async fn transition_payment(&mut self, t: &PaymentTransition) -> Result<u64, LedgerError>;

    /// `UPDATE .. WHERE id = ? AND fulfillment_status IN (from..)`.
    async fn transition_fulfillment(&mut self, t: &FulfillmentTransition)
        -> Result<u64, LedgerError>;

    /// `UPDATE .. WHERE id = ? AND refund_status IN (from..)`.
    async fn transition_refund(&mut self, t: &RefundTransition) -> Result<u64, LedgerError>;

    /// Take every item's quantity out of stock, floored at zero. `false` when
    /// the order's inventory-applied marker was already set.
    async fn apply_order_decrement(&mut self, order_id: Uuid) -> Result<bool, LedgerError>;

    /// Put back exactly what `apply_order_decrement` took. `false` when the
    /// marker was not set.
    async fn restore_order_decrement(&mut self, order_id: Uuid) -> Result<bool, LedgerError>;

    /// `false` when `(payment_reference, status)` already exists.
    async fn append_payment_log(&mut self, entry: &NewPaymentLogEntry) -> Result<bool, LedgerError>;

    async fn append_status_history(
        &mut self,
        entry: &NewStatusHistoryEntry,
    ) -> Result<(), LedgerError>;

    /// Number of cart lines removed.
    async fn clear_cart(&mut self, user_id: Uuid) -> Result<u64, LedgerError>;

    /// `false` when `(order_id, template)` was already queued.
    async fn enqueue_notification(&mut self, n: &NewNotification) -> Result<bool, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

// ---------------------------------------------------------------------------
// Payment gateway
// ---------------------------------------------------------------------------

/// Charge status as reported by the gateway's verify endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Failed,
    Abandoned,
    Reversed,
    /// Anything not yet settled (`pending`, `ongoing`, `processing`, `queued`, ..).
    Unsettled(String),
}

impl ChargeStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => ChargeStatus::Success,
            "failed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            "reversed" => ChargeStatus::Reversed,
            other => ChargeStatus::Unsettled(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChargeStatus::Success => "success",
            ChargeStatus::Failed => "failed",
            ChargeStatus::Abandoned => "abandoned",
            ChargeStatus::Reversed => "reversed",
            ChargeStatus::Unsettled(s) => s,
        }
    }

    /// `Some(true)` succeeded, `Some(false)` definitively not, `None` unsettled.
    pub fn settled_outcome(&self) -> Option<bool> {
        match self {
            ChargeStatus::Success => Some(true),
            ChargeStatus::Failed | ChargeStatus::Abandoned | ChargeStatus::Reversed => Some(false),
            ChargeStatus::Unsettled(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeVerification {
    pub status: ChargeStatus,
    /// Payment channel (card, bank, ussd, ..).
    pub method: Option<String>,
    pub amount: Option<Minor>,
    /// The gateway's human-readable reason, kept as the failure reason.
    pub gateway_response: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundInitStatus {
    Processed,
    Pending,
    Failed,
}

impl RefundInitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundInitStatus::Processed => "processed",
            RefundInitStatus::Pending => "pending",
            RefundInitStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundTicket {
    pub status: RefundInitStatus,
    pub ticket_id: Option<String>,
    pub raw: serde_json::Value,
}

/// The payment processor. Implementations must not retry internally; the
/// engine bounds every call with its own timeout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn verify(&self, reference: &str) -> Result<ChargeVerification, GatewayError>;

    async fn initiate_refund(
        &self,
        reference: &str,
        amount: Minor,
    ) -> Result<RefundTicket, GatewayError>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Delivers a rendered notification. Failures are reported, never retried
/// here; the outbox dispatcher owns retry.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template: NotificationTemplate,
        data: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_status_mapping() {
        assert_eq!(ChargeStatus::parse("success").settled_outcome(), Some(true));
        assert_eq!(ChargeStatus::parse("FAILED").settled_outcome(), Some(false));
        assert_eq!(ChargeStatus::parse("abandoned").settled_outcome(), Some(false));
        assert_eq!(ChargeStatus::parse("reversed").settled_outcome(), Some(false));
        for s in ["pending", "ongoing", "processing", "queued", ""] {
            assert_eq!(ChargeStatus::parse(s).settled_outcome(), None, "{s}");
        }
        assert_eq!(ChargeStatus::parse("ongoing").as_str(), "ongoing");
    }
}
