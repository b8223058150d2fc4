//! Error vocabulary for the engine and its ports.
//!
//! `AlreadyProcessed` is deliberately absent: a duplicate or late trigger is a
//! successful call that reports `already_processed = true` in its result.

use sfr_schemas::{FulfillmentStatus, PaymentStatus, RefundStatus, UnknownStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// LedgerError
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum LedgerError {
    /// A row the operation depends on does not exist.
    NotFound(String),
    Storage(anyhow::Error),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::NotFound(what) => write!(f, "ledger: not found: {what}"),
            LedgerError::Storage(e) => write!(f, "ledger: storage failure: {e:#}"),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<anyhow::Error> for LedgerError {
    fn from(e: anyhow::Error) -> Self {
        LedgerError::Storage(e)
    }
}

impl From<UnknownStatus> for LedgerError {
    fn from(e: UnknownStatus) -> Self {
        LedgerError::Storage(anyhow::Error::new(e))
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No answer within the bound. The request may or may not have landed.
    Timeout,
    /// The request never reached the gateway (connect/DNS/TLS failure).
    Unavailable(String),
    /// The gateway answered and refused. `code` feeds the refund error table.
    Rejected { code: String, message: String },
    /// The gateway answered with something we could not interpret.
    Protocol(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::Timeout => write!(f, "gateway: timed out"),
            GatewayError::Unavailable(m) => write!(f, "gateway: unavailable: {m}"),
            GatewayError::Rejected { code, message } => {
                write!(f, "gateway: rejected ({code}): {message}")
            }
            GatewayError::Protocol(m) => write!(f, "gateway: protocol error: {m}"),
        }
    }
}

impl std::error::Error for GatewayError {}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Everything a caller of the Coordinator or the cancellation workflow can
/// get back besides a result.
#[derive(Debug)]
pub enum EngineError {
    /// Unknown reference or order, or an order the actor does not own.
    NotFound(String),
    /// The requested transition is not legal from the order's current state.
    InvalidState {
        order_id: Uuid,
        payment: PaymentStatus,
        fulfillment: FulfillmentStatus,
        reason: String,
    },
    /// A refund attempt is already outstanding for this order.
    RefundInFlight {
        order_id: Uuid,
        refund: RefundStatus,
    },
    /// The caller lacks the role the operation requires.
    Forbidden(String),
    GatewayTimeout,
    Gateway(GatewayError),
    /// The gateway answered, but the charge has not settled either way.
    Inconclusive { gateway_status: String },
    Storage(anyhow::Error),
}

impl EngineError {
    /// Retrying the same call later may succeed without operator action.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            EngineError::GatewayTimeout
                | EngineError::Gateway(_)
                | EngineError::Inconclusive { .. }
                | EngineError::Storage(_)
        )
    }

    /// Stable machine-readable code for API bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::RefundInFlight { .. } => "REFUND_IN_FLIGHT",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::GatewayTimeout => "GATEWAY_TIMEOUT",
            EngineError::Gateway(_) => "GATEWAY_ERROR",
            EngineError::Inconclusive { .. } => "INCONCLUSIVE",
            EngineError::Storage(_) => "STORAGE",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::InvalidState {
                order_id,
                payment,
                fulfillment,
                reason,
            } => write!(
                f,
                "invalid state for order {order_id} (payment={payment}, fulfillment={fulfillment}): {reason}"
            ),
            EngineError::RefundInFlight { order_id, refund } => {
                write!(f, "refund already {refund} for order {order_id}")
            }
            EngineError::Forbidden(m) => write!(f, "forbidden: {m}"),
            EngineError::GatewayTimeout => write!(f, "gateway timed out; retry or poll later"),
            EngineError::Gateway(e) => write!(f, "{e}"),
            EngineError::Inconclusive { gateway_status } => {
                write!(f, "payment not settled at gateway (status={gateway_status}); retry later")
            }
            EngineError::Storage(e) => write!(f, "storage failure: {e:#}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(what) => EngineError::NotFound(what),
            LedgerError::Storage(e) => EngineError::Storage(e),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout => EngineError::GatewayTimeout,
            other => EngineError::Gateway(other),
        }
    }
}
