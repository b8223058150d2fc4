//! Payment & order reconciliation engine.
//!
//! [`Coordinator`] is the single entry point. It owns no I/O of its own;
//! storage, the payment gateway and notification delivery are injected
//! through the traits in [`ports`].

mod cancellation;
mod coordinator;
pub mod error;
pub mod notify;
pub mod ports;
mod queries;
mod refund;
pub mod types;
pub mod webhook;

pub use coordinator::Coordinator;
pub use error::{EngineError, GatewayError, LedgerError};
pub use notify::{DrainReport, LogSender, NotificationDispatcher};
pub use ports::{
    ChargeStatus, ChargeVerification, Ledger, LedgerTx, NotificationSender, PaymentGateway,
    RefundInitStatus, RefundTicket,
};
pub use types::{
    Actor, CancellationResult, OrderHistoryView, PaymentOutcome, PaymentStatusView,
    ReconciliationResult, RefundAttempt, RefundOutcome, Role,
};
pub use webhook::{WebhookDisposition, WebhookEvent, WebhookRejection};
