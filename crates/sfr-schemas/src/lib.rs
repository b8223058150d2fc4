use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod lifecycle;

pub use lifecycle::{
    FulfillmentStatus, HistoryStatus, Initiator, InventoryStatus, NotificationTemplate,
    OutboxStatus, PaymentLogStatus, PaymentStatus, RefundStatus, UnknownStatus,
};

/// Amounts are integer minor currency units (kobo, cents).
pub type Minor = i64;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub payment_reference: String,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub total: Minor,
    pub payment_method: Option<String>,
    pub paid_at_utc: Option<DateTime<Utc>>,
    pub customer_email: Option<String>,
    /// Set by the winning `pending -> paid` transition when stock was taken,
    /// cleared again on restore.
    pub inventory_applied: bool,
    pub refund_status: Option<RefundStatus>,
    pub refund_ticket: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl Order {
    /// The settled shape returned to every trigger.
    pub fn state(&self) -> OrderState {
        OrderState {
            order_id: self.id,
            payment_reference: self.payment_reference.clone(),
            payment_status: self.payment_status,
            fulfillment_status: self.fulfillment_status,
            refund_status: self.refund_status,
            payment_method: self.payment_method.clone(),
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    pub order_id: Uuid,
    pub payment_reference: String,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub refund_status: Option<RefundStatus>,
    pub payment_method: Option<String>,
    pub total: Minor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Minor,
    /// Quantity actually taken from stock (may be less than `quantity`
    /// when the decrement was floored at zero).
    pub applied_qty: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub quantity_on_hand: i32,
    pub status: InventoryStatus,
}

// ---------------------------------------------------------------------------
// Typed transitions
// ---------------------------------------------------------------------------

/// Allow-list for the conditional payment update. Only these columns can
/// change when a payment transition wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransition {
    pub reference: String,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    /// Written only when `Some`; an existing method is never overwritten.
    pub method: Option<String>,
    pub at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentTransition {
    pub order_id: Uuid,
    pub from: Vec<FulfillmentStatus>,
    pub to: FulfillmentStatus,
    pub at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundTransition {
    pub order_id: Uuid,
    /// `None` in this list matches an order that never had a refund.
    pub from: Vec<Option<RefundStatus>>,
    pub to: RefundStatus,
    /// Replaces the stored ticket only when `Some`.
    pub ticket: Option<String>,
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPaymentLogEntry {
    pub order_id: Uuid,
    pub payment_reference: String,
    pub status: PaymentLogStatus,
    pub amount: Minor,
    pub method: Option<String>,
    pub processed_by: Initiator,
    pub failure_reason: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLogEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_reference: String,
    pub status: PaymentLogStatus,
    pub amount: Minor,
    pub method: Option<String>,
    pub processed_by: Initiator,
    pub failure_reason: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub created_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatusHistoryEntry {
    pub order_id: Uuid,
    pub status: HistoryStatus,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: HistoryStatus,
    pub notes: String,
    pub created_at_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notification outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub order_id: Uuid,
    pub template: NotificationTemplate,
    pub recipient: String,
    pub data: serde_json::Value,
}

/// A row handed to a dispatcher by `claim_notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedNotification {
    pub id: Uuid,
    pub order_id: Uuid,
    pub template: NotificationTemplate,
    pub recipient: String,
    pub data: serde_json::Value,
    /// Attempts made before this claim.
    pub attempts: i32,
    pub claimed_by: String,
}
