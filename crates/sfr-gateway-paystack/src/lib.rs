//! Paystack-backed [`PaymentGateway`].
//!
//! The secret key is passed in by the caller (daemon/CLI) from the
//! environment; it is sent as a bearer token and never logged.
//!
//! Error mapping:
//! - request never delivered (connect/DNS/TLS) -> `Unavailable`
//! - no answer within the client timeout -> `Timeout`
//! - 4xx, or `"status": false` in the body -> `Rejected { code, message }`
//! - 5xx -> `Protocol`: the gateway may have acted before failing
//! - 2xx with a body we cannot read -> `Protocol`

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sfr_engine::{
    ChargeStatus, ChargeVerification, GatewayError, PaymentGateway, RefundInitStatus,
    RefundTicket,
};
use sfr_schemas::Minor;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

#[derive(Clone)]
pub struct PaystackGateway {
    secret_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for PaystackGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaystackGateway")
            .field("base_url", &self.base_url)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl PaystackGateway {
    pub fn new(secret_key: String, timeout: Duration) -> Result<Self> {
        Self::new_with_base_url(secret_key, DEFAULT_BASE_URL.to_string(), timeout)
    }

    /// `timeout` bounds each request end to end. The engine applies its own
    /// bound on top.
    pub fn new_with_base_url(
        secret_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("paystack http client build failed")?;
        Ok(Self {
            secret_key,
            http,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `/transaction/verify/<reference>` with the reference percent-encoded
    /// as a single path segment.
    fn verify_url(&self, reference: &str) -> Result<reqwest::Url, GatewayError> {
        let mut url = reqwest::Url::parse(&self.url("/transaction/verify"))
            .map_err(|e| GatewayError::Unavailable(format!("invalid gateway base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Unavailable("gateway base url has no path".to_string()))?
            .push(reference);
        Ok(url)
    }

    async fn read(&self, resp: reqwest::Response) -> Result<Value, GatewayError> {
        let status = resp.status();
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) if e.is_timeout() => return Err(GatewayError::Timeout),
            Err(e) if status.is_success() => {
                return Err(GatewayError::Protocol(format!("response json decode failed: {e}")))
            }
            Err(_) => Value::Null,
        };
        if !status.is_success() || body.get("status").and_then(Value::as_bool) == Some(false) {
            return Err(answer_error(status.as_u16(), &body));
        }
        Ok(body)
    }
}

#[derive(Serialize)]
struct RefundRequest<'a> {
    transaction: &'a str,
    amount: Minor,
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn verify(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let resp = self
            .http
            .get(self.verify_url(reference)?)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport)?;
        let body = self.read(resp).await?;
        parse_verify_body(&body)
    }

    async fn initiate_refund(
        &self,
        reference: &str,
        amount: Minor,
    ) -> Result<RefundTicket, GatewayError> {
        let resp = self
            .http
            .post(self.url("/refund"))
            .bearer_auth(&self.secret_key)
            .json(&RefundRequest {
                transaction: reference,
                amount,
            })
            .send()
            .await
            .map_err(transport)?;
        let body = self.read(resp).await?;
        let ticket = parse_refund_body(&body)?;
        tracing::info!(
            reference,
            amount,
            status = ticket.status.as_str(),
            "paystack refund accepted"
        );
        Ok(ticket)
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else if e.is_connect() || e.is_builder() {
        GatewayError::Unavailable(e.to_string())
    } else {
        // Sent, but the exchange broke; we cannot say whether it landed.
        GatewayError::Protocol(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Response parsing (no network)
// ---------------------------------------------------------------------------

/// Map a failed answer. A 5xx says nothing about whether the request took
/// effect, so it is inconclusive rather than a rejection.
pub fn answer_error(http_status: u16, body: &Value) -> GatewayError {
    if (500..600).contains(&http_status) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no message");
        return GatewayError::Protocol(format!("gateway answered http_{http_status}: {message}"));
    }
    rejection(http_status, body)
}

/// Error envelope: `{"status": false, "message": "...", "code": "..."}`.
/// Without a `code`, the HTTP status stands in (`http_404`).
pub fn rejection(http_status: u16, body: &Value) -> GatewayError {
    let code = body
        .get("code")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("http_{http_status}"));
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no message")
        .to_string();
    GatewayError::Rejected { code, message }
}

pub fn parse_verify_body(body: &Value) -> Result<ChargeVerification, GatewayError> {
    let data = body
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| GatewayError::Protocol("verify: missing data".to_string()))?;
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Protocol("verify: missing data.status".to_string()))?;

    Ok(ChargeVerification {
        status: ChargeStatus::parse(status),
        method: data
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_string),
        amount: data.get("amount").and_then(Value::as_i64),
        gateway_response: data
            .get("gateway_response")
            .and_then(Value::as_str)
            .map(str::to_string),
        raw: data.clone(),
    })
}

pub fn parse_refund_body(body: &Value) -> Result<RefundTicket, GatewayError> {
    let data = body
        .get("data")
        .filter(|d| d.is_object())
        .ok_or_else(|| GatewayError::Protocol("refund: missing data".to_string()))?;
    let status = data
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::Protocol("refund: missing data.status".to_string()))?;

    let status = match status.trim().to_ascii_lowercase().as_str() {
        "processed" => RefundInitStatus::Processed,
        "failed" => RefundInitStatus::Failed,
        // pending, processing, queued, needs-attention: all still moving.
        _ => RefundInitStatus::Pending,
    };
    let ticket_id = match data.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    Ok(RefundTicket {
        status,
        ticket_id,
        raw: data.clone(),
    })
}
