//! Request and response types for sfr-daemon HTTP endpoints.
//!
//! No business logic lives here. Engine results (`ReconciliationResult`,
//! `CancellationResult`, views) are serialized as they are.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// "SANDBOX" | "LIVE"
    pub mode: String,
    pub uptime_secs: u64,
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. "NOT_FOUND", "SIGNATURE_INVALID".
    pub code: String,
    pub error: String,
    /// Retrying the same request later may succeed.
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// POST /v1/payment/test-webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestWebhookRequest {
    pub reference: String,
    /// "charge.success" (default) or "charge.failed".
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /v1/admin/orders/:id/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentUpdateRequest {
    /// Target fulfillment status, e.g. "shipped".
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}
