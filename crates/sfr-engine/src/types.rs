use serde::{Deserialize, Serialize};
use sfr_schemas::{Initiator, Minor, OrderState, PaymentLogEntry, StatusHistoryEntry};
use uuid::Uuid;

use crate::ports::RefundInitStatus;

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" | "user" => Some(Role::Customer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// An authenticated caller, as established by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn initiator(&self) -> Initiator {
        match self.role {
            Role::Customer => Initiator::User,
            Role::Admin => Initiator::Admin,
        }
    }

    /// Admins see every order; customers only their own.
    pub fn may_see(&self, owner: Uuid) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A settled payment result, from whichever trigger observed it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub succeeded: bool,
    pub method: Option<String>,
    /// Amount the gateway says it charged, when it says.
    pub amount: Option<Minor>,
    pub failure_reason: Option<String>,
    pub gateway_payload: Option<serde_json::Value>,
}

impl PaymentOutcome {
    pub fn succeeded(method: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            method: Some(method.into()),
            amount: None,
            failure_reason: None,
            gateway_payload: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            method: None,
            amount: None,
            failure_reason: Some(reason.into()),
            gateway_payload: None,
        }
    }

    pub fn with_amount(mut self, amount: Minor) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.gateway_payload = Some(payload);
        self
    }
}

/// Asynchronous refund result reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundOutcome {
    Processed,
    Pending,
    Failed,
}

impl RefundOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundOutcome::Processed => "processed",
            RefundOutcome::Pending => "pending",
            RefundOutcome::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What happened when the engine submitted a refund to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefundAttempt {
    /// Accepted by the gateway; the refund webhook finalizes it.
    InProgress {
        gateway_status: RefundInitStatus,
        ticket: Option<String>,
    },
    /// The gateway says the charge is already reversed; recorded as refunded.
    AlreadyRefunded,
    /// Left `failed` for an operator to retry.
    Failed { reason: String },
    /// Outcome unknown; the refund stays `requested` until a webhook or
    /// operator settles it.
    Inconclusive { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// `true` when this call lost the race or replayed a settled outcome.
    pub already_processed: bool,
    pub state: OrderState,
    /// Set when the winning payment landed on a cancelled order.
    pub refund: Option<RefundAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub state: OrderState,
    pub inventory_restored: bool,
    /// `None` when the order was never paid.
    pub refund: Option<RefundAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusView {
    pub state: OrderState,
    pub paid_at_utc: Option<chrono::DateTime<chrono::Utc>>,
    pub item_count: usize,
    /// Newest first, at most five.
    pub recent_logs: Vec<PaymentLogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHistoryView {
    pub state: OrderState,
    pub history: Vec<StatusHistoryEntry>,
}
