//! Gateway webhook intake: signature check, payload parsing, event routing.
//!
//! The gateway signs the raw request body with HMAC-SHA512 keyed by the
//! account secret and sends the lowercase hex digest in a header. Nothing
//! reaches the Coordinator until that digest matches. Comparison is constant
//! time.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha512;
use sfr_schemas::Initiator;
use subtle::ConstantTimeEq;

use crate::coordinator::Coordinator;
use crate::error::EngineError;
use crate::types::{PaymentOutcome, ReconciliationResult, RefundOutcome};

type HmacSha512 = Hmac<Sha512>;

// ---------------------------------------------------------------------------
// WebhookRejection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookRejection {
    EmptyBody,
    /// Missing, malformed or mismatched signature header.
    SignatureInvalid,
    /// Authentic but unusable payload.
    Malformed(String),
}

impl std::fmt::Display for WebhookRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookRejection::EmptyBody => write!(f, "webhook: empty body"),
            WebhookRejection::SignatureInvalid => write!(f, "webhook: invalid signature"),
            WebhookRejection::Malformed(m) => write!(f, "webhook: malformed payload: {m}"),
        }
    }
}

impl std::error::Error for WebhookRejection {}

// ---------------------------------------------------------------------------
// Signatures
// ---------------------------------------------------------------------------

/// Lowercase hex HMAC-SHA512 of `body`.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> Result<String, WebhookRejection> {
    let mut mac =
        HmacSha512::new_from_slice(secret).map_err(|_| WebhookRejection::SignatureInvalid)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the raw body and its signature header, in that order.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    signature_hex: Option<&str>,
) -> Result<(), WebhookRejection> {
    if body.is_empty() {
        return Err(WebhookRejection::EmptyBody);
    }
    let provided = signature_hex
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookRejection::SignatureInvalid)?;
    let provided =
        hex::decode(provided.to_ascii_lowercase()).map_err(|_| WebhookRejection::SignatureInvalid)?;

    let mut mac =
        HmacSha512::new_from_slice(secret).map_err(|_| WebhookRejection::SignatureInvalid)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    if expected.len() != provided.len() {
        return Err(WebhookRejection::SignatureInvalid);
    }
    if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        Ok(())
    } else {
        Err(WebhookRejection::SignatureInvalid)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Charge {
        reference: String,
        outcome: PaymentOutcome,
    },
    Refund {
        reference: String,
        outcome: RefundOutcome,
        payload: Value,
    },
    /// Any event type this service does not act on.
    Unhandled { event: String },
}

impl WebhookEvent {
    pub fn reference(&self) -> Option<&str> {
        match self {
            WebhookEvent::Charge { reference, .. } | WebhookEvent::Refund { reference, .. } => {
                Some(reference)
            }
            WebhookEvent::Unhandled { .. } => None,
        }
    }
}

/// Parse a verified body. Charge events key on `data.reference`; refund
/// events on `data.transaction_reference` (or `data.transaction.reference`).
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, WebhookRejection> {
    if body.is_empty() {
        return Err(WebhookRejection::EmptyBody);
    }
    let v: Value = serde_json::from_slice(body)
        .map_err(|e| WebhookRejection::Malformed(format!("invalid json: {e}")))?;
    let event = v
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| WebhookRejection::Malformed("missing event".to_string()))?
        .to_string();
    let data = v.get("data").cloned().unwrap_or(Value::Null);

    let charge = |succeeded: bool| -> Result<WebhookEvent, WebhookRejection> {
        let reference = non_empty_str(&data, "/reference")
            .ok_or_else(|| WebhookRejection::Malformed("missing data.reference".to_string()))?;
        let method = non_empty_str(&data, "/channel");
        let amount = data.get("amount").and_then(Value::as_i64);
        let gateway_response = non_empty_str(&data, "/gateway_response");
        let outcome = PaymentOutcome {
            succeeded,
            method,
            amount,
            failure_reason: if succeeded {
                None
            } else {
                Some(gateway_response.unwrap_or_else(|| "charge failed".to_string()))
            },
            gateway_payload: Some(data.clone()),
        };
        Ok(WebhookEvent::Charge { reference, outcome })
    };

    let refund = |outcome: RefundOutcome| -> Result<WebhookEvent, WebhookRejection> {
        let reference = non_empty_str(&data, "/transaction_reference")
            .or_else(|| non_empty_str(&data, "/transaction/reference"))
            .ok_or_else(|| {
                WebhookRejection::Malformed("missing data.transaction_reference".to_string())
            })?;
        Ok(WebhookEvent::Refund {
            reference,
            outcome,
            payload: data.clone(),
        })
    };

    match event.as_str() {
        "charge.success" => charge(true),
        "charge.failed" => charge(false),
        "refund.processed" => refund(RefundOutcome::Processed),
        "refund.pending" => refund(RefundOutcome::Pending),
        "refund.failed" => refund(RefundOutcome::Failed),
        _ => Ok(WebhookEvent::Unhandled { event }),
    }
}

fn non_empty_str(v: &Value, pointer: &str) -> Option<String> {
    let s = v.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum WebhookDisposition {
    Reconciled(ReconciliationResult),
    /// Event type not handled; acknowledged so the gateway stops redelivering.
    Ignored { event: String },
    /// Reference unknown to this ledger; acknowledged and dropped.
    Dropped { reference: String },
}

impl Coordinator {
    pub async fn handle_webhook_event(
        &self,
        event: WebhookEvent,
    ) -> Result<WebhookDisposition, EngineError> {
        let reference = event.reference().map(str::to_string);
        let result = match event {
            WebhookEvent::Charge { reference, outcome } => {
                self.reconcile_payment(&reference, outcome, Initiator::Webhook)
                    .await
            }
            WebhookEvent::Refund {
                reference,
                outcome,
                payload,
            } => {
                self.reconcile_refund_outcome(&reference, outcome, Some(payload))
                    .await
            }
            WebhookEvent::Unhandled { event } => {
                tracing::info!(event = %event, "webhook event ignored");
                return Ok(WebhookDisposition::Ignored { event });
            }
        };

        match result {
            Ok(r) => Ok(WebhookDisposition::Reconciled(r)),
            Err(EngineError::NotFound(_)) => {
                let reference = reference.unwrap_or_default();
                tracing::warn!(reference = %reference, "webhook for unknown reference dropped");
                Ok(WebhookDisposition::Dropped { reference })
            }
            Err(e) => Err(e),
        }
    }
}
