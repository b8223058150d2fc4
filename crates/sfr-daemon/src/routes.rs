//! Axum router and all HTTP handlers for sfr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. The scenario tests in `tests/` compose the bare router.
//!
//! Authentication happens upstream. The gateway in front of this service
//! forwards the authenticated caller as `x-user-id` (uuid) and `x-user-role`
//! (`customer` | `admin`, default `customer`).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use sfr_config::ConfigMode;
use sfr_engine::{
    webhook, Actor, EngineError, PaymentOutcome, Role, WebhookDisposition, WebhookEvent,
    WebhookRejection,
};
use sfr_schemas::{FulfillmentStatus, PaymentStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{
        CancelRequest, ErrorResponse, FulfillmentUpdateRequest, HealthResponse, TestWebhookRequest,
    },
    state::{uptime_secs, AppState},
};

pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_ROLE: &str = "x-user-role";

const CACHE_PAID: &str = "public, max-age=3600";
const CACHE_UNSETTLED: &str = "no-cache";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/payment/webhook", post(payment_webhook))
        .route("/v1/payment/test-webhook", post(test_webhook))
        .route("/v1/payment/verify/:reference", post(verify_payment))
        .route("/v1/payment/status/:reference", get(payment_status))
        .route("/v1/orders/:order_id/cancel", post(cancel_order))
        .route("/v1/orders/:order_id/history", get(order_history))
        .route("/v1/admin/payment/verify/:reference", post(admin_verify_payment))
        .route("/v1/admin/orders/:order_id/status", post(admin_update_status))
        .route("/v1/admin/orders/:order_id/refund/retry", post(admin_retry_refund))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            mode: st.mode.as_str().to_string(),
            uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/payment/webhook
// ---------------------------------------------------------------------------

/// Gateway callback. The signature is checked against the raw body before
/// anything is parsed. Unknown references and unhandled events are
/// acknowledged with 200 so the gateway stops redelivering; storage failures
/// answer 500 so it tries again.
pub(crate) async fn payment_webhook(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = st.webhook_secret.as_deref() else {
        tracing::error!("webhook received but no gateway secret is configured");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "WEBHOOK_SECRET_MISSING",
            "webhook secret not configured".to_string(),
            false,
        );
    };

    let signature = headers
        .get(st.signature_header.as_str())
        .and_then(|v| v.to_str().ok());
    if let Err(r) = webhook::verify_signature(secret.as_bytes(), &body, signature) {
        return rejection_response(r);
    }

    let event = match webhook::parse_event(&body) {
        Ok(ev) => ev,
        Err(r) => return rejection_response(r),
    };

    match st.coordinator.handle_webhook_event(event).await {
        Ok(disposition) => (StatusCode::OK, Json(disposition)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/payment/test-webhook
// ---------------------------------------------------------------------------

/// SANDBOX only: synthesize a charge event for an existing order and route it
/// exactly like a signed gateway callback.
pub(crate) async fn test_webhook(
    State(st): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    if st.mode == ConfigMode::Live {
        return error_response(
            StatusCode::FORBIDDEN,
            "TEST_WEBHOOK_DISABLED",
            "test webhook is only available in SANDBOX mode".to_string(),
            false,
        );
    }
    let req: TestWebhookRequest = match parse_body(&body) {
        Ok(Some(r)) => r,
        Ok(None) => return bad_request("BAD_REQUEST", "request body required".to_string()),
        Err(resp) => return resp,
    };

    let reference = req.reference.trim().to_string();
    if reference.is_empty() {
        return bad_request("BAD_REQUEST", "reference required".to_string());
    }
    let event = req.event.as_deref().unwrap_or("charge.success");
    let payload = json!({ "reference": reference, "event": event, "test": true });
    let outcome = match event {
        "charge.success" => {
            PaymentOutcome::succeeded(req.channel.unwrap_or_else(|| "test".to_string()))
                .with_payload(payload)
        }
        "charge.failed" => PaymentOutcome::failed("test charge failed").with_payload(payload),
        other => {
            return bad_request(
                "UNSUPPORTED_EVENT",
                format!("unsupported test event '{other}'; use charge.success or charge.failed"),
            )
        }
    };

    info!(reference = %reference, event, "test webhook");
    match st
        .coordinator
        .handle_webhook_event(WebhookEvent::Charge { reference, outcome })
        .await
    {
        Ok(WebhookDisposition::Dropped { reference }) => error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("not found: payment reference {reference}"),
            false,
        ),
        Ok(disposition) => (StatusCode::OK, Json(disposition)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/payment/verify/:reference
// POST /v1/admin/payment/verify/:reference
// ---------------------------------------------------------------------------

/// User poll after the gateway redirect. Customers may only verify their own
/// orders; anyone else's reference looks unknown.
pub(crate) async fn verify_payment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match st.coordinator.verify_and_reconcile(&reference, actor).await {
        Ok(r) => (StatusCode::OK, Json(r)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

/// Manual override: an admin asks the gateway about any order.
pub(crate) async fn admin_verify_payment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Response {
    let actor = match admin_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match st.coordinator.verify_and_reconcile(&reference, actor).await {
        Ok(r) => (StatusCode::OK, Json(r)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/payment/status/:reference
// ---------------------------------------------------------------------------

/// Settled (paid) answers are cacheable for an hour; anything still moving
/// is `no-cache`.
pub(crate) async fn payment_status(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match st.coordinator.payment_status(&reference, actor).await {
        Ok(view) => {
            let cache = if view.state.payment_status == PaymentStatus::Paid {
                CACHE_PAID
            } else {
                CACHE_UNSETTLED
            };
            (StatusCode::OK, [(header::CACHE_CONTROL, cache)], Json(view)).into_response()
        }
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:order_id/cancel
// ---------------------------------------------------------------------------

pub(crate) async fn cancel_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let req: CancelRequest = match parse_body(&body) {
        Ok(r) => r.unwrap_or_default(),
        Err(resp) => return resp,
    };
    match st.coordinator.cancel_order(order_id, actor, req.notes).await {
        Ok(r) => (StatusCode::OK, Json(r)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/orders/:order_id/history
// ---------------------------------------------------------------------------

pub(crate) async fn order_history(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Response {
    let actor = match actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match st.coordinator.order_history(order_id, actor).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/admin/orders/:order_id/status
// ---------------------------------------------------------------------------

pub(crate) async fn admin_update_status(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    body: Bytes,
) -> Response {
    let actor = match admin_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let req: FulfillmentUpdateRequest = match parse_body(&body) {
        Ok(Some(r)) => r,
        Ok(None) => return bad_request("BAD_REQUEST", "request body required".to_string()),
        Err(resp) => return resp,
    };
    let to = match FulfillmentStatus::parse(&req.status.trim().to_ascii_lowercase()) {
        Ok(s) => s,
        Err(e) => return bad_request("INVALID_STATUS", e.to_string()),
    };
    match st
        .coordinator
        .advance_fulfillment(order_id, to, req.notes, actor)
        .await
    {
        Ok(state) => (StatusCode::OK, Json(state)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/admin/orders/:order_id/refund/retry
// ---------------------------------------------------------------------------

pub(crate) async fn admin_retry_refund(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Response {
    let actor = match admin_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    match st.coordinator.retry_refund(order_id, actor).await {
        Ok(r) => (StatusCode::OK, Json(r)).into_response(),
        Err(e) => engine_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The caller as forwarded by the upstream auth layer.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let unauthenticated = |msg: &str| {
        error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            msg.to_string(),
            false,
        )
    };

    let user_id = headers
        .get(HEADER_USER_ID)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthenticated("missing x-user-id"))?;
    let user_id =
        Uuid::parse_str(user_id.trim()).map_err(|_| unauthenticated("x-user-id is not a uuid"))?;

    let role = match headers.get(HEADER_USER_ROLE).and_then(|v| v.to_str().ok()) {
        None => Role::Customer,
        Some(raw) => Role::parse(raw).ok_or_else(|| unauthenticated("unknown x-user-role"))?,
    };
    Ok(Actor { user_id, role })
}

fn admin_from_headers(headers: &HeaderMap) -> Result<Actor, Response> {
    let actor = actor_from_headers(headers)?;
    if !actor.is_admin() {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "admin role required".to_string(),
            false,
        ));
    }
    Ok(actor)
}

/// `Ok(None)` for an empty body; malformed JSON is a 400.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| bad_request("BAD_REQUEST", format!("invalid json body: {e}")))
}

fn bad_request(code: &str, error: String) -> Response {
    error_response(StatusCode::BAD_REQUEST, code, error, false)
}

fn error_response(status: StatusCode, code: &str, error: String, retryable: bool) -> Response {
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            error,
            retryable,
        }),
    )
        .into_response()
}

fn rejection_response(r: WebhookRejection) -> Response {
    match r {
        WebhookRejection::EmptyBody => bad_request("EMPTY_BODY", r.to_string()),
        WebhookRejection::SignatureInvalid => {
            warn!("webhook rejected: invalid signature");
            error_response(
                StatusCode::UNAUTHORIZED,
                "SIGNATURE_INVALID",
                r.to_string(),
                false,
            )
        }
        WebhookRejection::Malformed(_) => {
            warn!(error = %r, "webhook rejected");
            bad_request("MALFORMED_PAYLOAD", r.to_string())
        }
    }
}

/// HTTP status for each engine error. Inconclusive is 202: the request was
/// understood, nothing changed, poll again.
pub fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::InvalidState { .. } | EngineError::RefundInFlight { .. } => {
            StatusCode::CONFLICT
        }
        EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
        EngineError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Gateway(_) => StatusCode::BAD_GATEWAY,
        EngineError::Inconclusive { .. } => StatusCode::ACCEPTED,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error_response(e: &EngineError) -> Response {
    let status = status_for(e);
    if status.is_server_error() {
        tracing::error!(code = e.code(), error = %e, "request failed");
    } else if e.retryable() {
        warn!(code = e.code(), error = %e, "request inconclusive");
    }
    error_response(status, e.code(), e.to_string(), e.retryable())
}
