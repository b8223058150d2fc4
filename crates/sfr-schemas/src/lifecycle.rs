//! Order lifecycle vocabulary and the legal transition tables.
//!
//! # State diagrams
//!
//! ```text
//! payment:      pending ──► paid ──► refunded (term.)
//!                  │
//!                  └──────► failed (term.)
//!
//! fulfillment:  pending ──► processing ──► shipped ──► delivered (term.)
//!                  │             │
//!                  └─────────────┴──► cancelled (term.)
//! ```
//!
//! `pending → processing` only happens as a consequence of `payment → paid`.
//! `failed` exists for stored rows but no edge in this engine leads into it.
//!
//! Every status is persisted as its lower-case `as_str()` form; `parse` is
//! the exact inverse and rejects anything else.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// UnknownStatus
// ---------------------------------------------------------------------------

/// Returned by `parse` when a stored status string is not part of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {} status: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownStatus {}

macro_rules! status_strings {
    ($ty:ident, $kind:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s,)+
                }
            }

            pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(UnknownStatus {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// PaymentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

status_strings!(PaymentStatus, "payment", {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
});

impl PaymentStatus {
    /// `failed` and `refunded` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }

    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!((self, to), (Pending, Paid) | (Pending, Failed) | (Paid, Refunded))
    }
}

// ---------------------------------------------------------------------------
// FulfillmentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Failed,
}

status_strings!(FulfillmentStatus, "fulfillment", {
    Pending => "pending",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Failed => "failed",
});

impl FulfillmentStatus {
    /// States from which a cancellation may be requested.
    pub const CANCELLABLE: [FulfillmentStatus; 2] =
        [FulfillmentStatus::Pending, FulfillmentStatus::Processing];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Failed)
    }

    pub fn is_cancellable(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    pub fn can_transition_to(&self, to: FulfillmentStatus) -> bool {
        use FulfillmentStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
        )
    }
}

// ---------------------------------------------------------------------------
// RefundStatus
// ---------------------------------------------------------------------------

/// Progress of the single refund attempt an order may carry.
///
/// `requested` means the attempt has been claimed and is being (or was)
/// submitted; the gateway outcome is not yet known. `in_progress` means the
/// gateway accepted it and the refund webhook will finalize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Requested,
    InProgress,
    Completed,
    Failed,
}

status_strings!(RefundStatus, "refund", {
    Requested => "requested",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

impl RefundStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Requested | Self::InProgress)
    }
}

// ---------------------------------------------------------------------------
// InventoryStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Active,
    OutOfStock,
}

status_strings!(InventoryStatus, "inventory", {
    Active => "active",
    OutOfStock => "out_of_stock",
});

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Who triggered a reconciliation. Stored as `processed_by` on payment logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
    User,
    Admin,
    Webhook,
}

status_strings!(Initiator, "initiator", {
    User => "user",
    Admin => "admin",
    Webhook => "webhook",
});

// ---------------------------------------------------------------------------
// Audit vocabularies
// ---------------------------------------------------------------------------

/// Status column of a payment log entry. Together with the payment reference
/// it forms the dedup key of the payment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentLogStatus {
    Paid,
    Failed,
    RefundRequested,
    RefundPending,
    Refunded,
    RefundFailed,
}

status_strings!(PaymentLogStatus, "payment log", {
    Paid => "paid",
    Failed => "failed",
    RefundRequested => "refund_requested",
    RefundPending => "refund_pending",
    Refunded => "refunded",
    RefundFailed => "refund_failed",
});

/// Status column of an order status history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    PaymentFailed,
    PaymentAfterCancel,
    RefundPending,
    Refunded,
    RefundFailed,
}

status_strings!(HistoryStatus, "history", {
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    PaymentFailed => "payment_failed",
    PaymentAfterCancel => "payment_after_cancel",
    RefundPending => "refund_pending",
    Refunded => "refunded",
    RefundFailed => "refund_failed",
});

impl From<FulfillmentStatus> for Option<HistoryStatus> {
    fn from(s: FulfillmentStatus) -> Self {
        match s {
            FulfillmentStatus::Processing => Some(HistoryStatus::Processing),
            FulfillmentStatus::Shipped => Some(HistoryStatus::Shipped),
            FulfillmentStatus::Delivered => Some(HistoryStatus::Delivered),
            FulfillmentStatus::Cancelled => Some(HistoryStatus::Cancelled),
            FulfillmentStatus::Pending | FulfillmentStatus::Failed => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Notification outbox vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    PaymentConfirmed,
    PaymentFailed,
    OrderCancelled,
    RefundProcessed,
}

status_strings!(NotificationTemplate, "notification template", {
    PaymentConfirmed => "payment_confirmed",
    PaymentFailed => "payment_failed",
    OrderCancelled => "order_cancelled",
    RefundProcessed => "refund_processed",
});

/// pending -> claimed -> sent, or back to pending with `attempts + 1`,
/// ending in failed once the attempt budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Claimed,
    Sent,
    Failed,
}

status_strings!(OutboxStatus, "outbox", {
    Pending => "pending",
    Claimed => "claimed",
    Sent => "sent",
    Failed => "failed",
});

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
