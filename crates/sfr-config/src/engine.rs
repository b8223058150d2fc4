//! Typed view over the merged config JSON.
//!
//! Every key has a default so an empty config is valid. Values are range
//! checked once here; callers never re-read the JSON.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://api.paystack.co";
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-paystack-signature";

// ---------------------------------------------------------------------------
// Refund error table
// ---------------------------------------------------------------------------

/// How a gateway refund rejection is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundErrorClass {
    /// The charge is already reversed at the gateway; record the order as refunded.
    AlreadyRefunded,
    /// Leave the refund `failed` for an operator to retry or resolve.
    ManualReview,
}

impl RefundErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundErrorClass::AlreadyRefunded => "already_refunded",
            RefundErrorClass::ManualReview => "manual_review",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "already_refunded" => Ok(RefundErrorClass::AlreadyRefunded),
            "manual_review" => Ok(RefundErrorClass::ManualReview),
            other => bail!(
                "CONFIG_INVALID refund error class '{other}'; expected already_refunded | manual_review"
            ),
        }
    }
}

/// Gateway refund error code -> classification. Unlisted codes are
/// `ManualReview`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundErrorTable {
    entries: BTreeMap<String, RefundErrorClass>,
}

impl Default for RefundErrorTable {
    fn default() -> Self {
        let entries = [
            "transaction_reversed",
            "transaction_fully_reversed",
            "refund_already_processed",
        ]
        .into_iter()
        .map(|c| (c.to_string(), RefundErrorClass::AlreadyRefunded))
        .collect();
        Self { entries }
    }
}

impl RefundErrorTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, code: &str, class: RefundErrorClass) -> Self {
        self.entries.insert(normalize_code(code), class);
        self
    }

    /// Codes are compared case-insensitively.
    pub fn classify(&self, code: &str) -> RefundErrorClass {
        self.entries
            .get(&normalize_code(code))
            .copied()
            .unwrap_or(RefundErrorClass::ManualReview)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overlay `/refund/error_codes` (a map of code -> class) on the defaults.
    fn from_config_json(config_json: &Value) -> Result<Self> {
        let mut table = Self::default();
        let Some(v) = config_json.pointer("/refund/error_codes") else {
            return Ok(table);
        };
        let map = v
            .as_object()
            .context("CONFIG_INVALID /refund/error_codes must be a mapping")?;
        for (code, class) in map {
            let class = class.as_str().with_context(|| {
                format!("CONFIG_INVALID /refund/error_codes/{code} must be a string")
            })?;
            table = table.with(code, RefundErrorClass::parse(class)?);
        }
        Ok(table)
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub batch_size: i64,
    pub max_attempts: i32,
    pub drain_interval: Duration,
    /// A claim older than this is considered abandoned and re-claimable.
    pub stale_claim: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_attempts: 5,
            drain_interval: Duration::from_secs(15),
            stale_claim: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on every outbound gateway call.
    pub gateway_timeout: Duration,
    pub gateway_base_url: String,
    pub webhook_signature_header: String,
    pub notifications: NotificationSettings,
    pub refund_errors: RefundErrorTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_millis(DEFAULT_GATEWAY_TIMEOUT_MS),
            gateway_base_url: DEFAULT_GATEWAY_BASE_URL.to_string(),
            webhook_signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            notifications: NotificationSettings::default(),
            refund_errors: RefundErrorTable::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let defaults = EngineConfig::default();
        let nd = &defaults.notifications;

        let timeout_ms = read_u64(
            config_json,
            "/engine/gateway_timeout_ms",
            DEFAULT_GATEWAY_TIMEOUT_MS,
        )?;
        if timeout_ms == 0 {
            bail!("CONFIG_INVALID /engine/gateway_timeout_ms must be > 0");
        }

        let batch_size = read_u64(
            config_json,
            "/notifications/batch_size",
            nd.batch_size as u64,
        )?;
        if batch_size == 0 {
            bail!("CONFIG_INVALID /notifications/batch_size must be > 0");
        }
        let max_attempts = read_u64(
            config_json,
            "/notifications/max_attempts",
            nd.max_attempts as u64,
        )?;
        if max_attempts == 0 || max_attempts > i32::MAX as u64 {
            bail!("CONFIG_INVALID /notifications/max_attempts must be in 1..=i32::MAX");
        }
        let drain_secs = read_u64(
            config_json,
            "/notifications/drain_interval_secs",
            nd.drain_interval.as_secs(),
        )?;
        if drain_secs == 0 {
            bail!("CONFIG_INVALID /notifications/drain_interval_secs must be > 0");
        }
        let stale_secs = read_u64(
            config_json,
            "/notifications/stale_claim_secs",
            nd.stale_claim.as_secs(),
        )?;

        Ok(Self {
            gateway_timeout: Duration::from_millis(timeout_ms),
            gateway_base_url: read_string(config_json, "/gateway/base_url")
                .unwrap_or(defaults.gateway_base_url),
            webhook_signature_header: read_string(config_json, "/webhook/signature_header")
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or(defaults.webhook_signature_header),
            notifications: NotificationSettings {
                batch_size: batch_size.min(i64::MAX as u64) as i64,
                max_attempts: max_attempts as i32,
                drain_interval: Duration::from_secs(drain_secs),
                stale_claim: Duration::from_secs(stale_secs),
            },
            refund_errors: RefundErrorTable::from_config_json(config_json)?,
        })
    }
}

fn read_u64(config_json: &Value, pointer: &str, default: u64) -> Result<u64> {
    match config_json.pointer(pointer) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .with_context(|| format!("CONFIG_INVALID {pointer} must be a non-negative integer")),
    }
}

fn read_string(config_json: &Value, pointer: &str) -> Option<String> {
    let s = config_json.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_config_yields_defaults() {
        let cfg = EngineConfig::from_config_json(&json!({})).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.gateway_timeout, Duration::from_secs(10));
        assert_eq!(cfg.notifications.max_attempts, 5);
    }

    #[test]
    fn overrides_and_header_is_lowercased() {
        let cfg = EngineConfig::from_config_json(&json!({
            "engine": { "gateway_timeout_ms": 2500 },
            "webhook": { "signature_header": "X-Paystack-Signature" },
            "notifications": { "batch_size": 5 }
        }))
        .unwrap();
        assert_eq!(cfg.gateway_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.webhook_signature_header, "x-paystack-signature");
        assert_eq!(cfg.notifications.batch_size, 5);
        assert_eq!(cfg.notifications.max_attempts, 5);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = EngineConfig::from_config_json(&json!({
            "engine": { "gateway_timeout_ms": 0 }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("gateway_timeout_ms"));
    }

    #[test]
    fn refund_table_defaults_then_overlay() {
        let cfg = EngineConfig::from_config_json(&json!({
            "refund": { "error_codes": {
                "Duplicate_Refund": "already_refunded",
                "transaction_reversed": "manual_review"
            }}
        }))
        .unwrap();
        let t = &cfg.refund_errors;
        assert_eq!(t.classify("duplicate_refund"), RefundErrorClass::AlreadyRefunded);
        assert_eq!(t.classify("transaction_reversed"), RefundErrorClass::ManualReview);
        assert_eq!(
            t.classify("REFUND_ALREADY_PROCESSED"),
            RefundErrorClass::AlreadyRefunded
        );
        assert_eq!(t.classify("insufficient_balance"), RefundErrorClass::ManualReview);
    }

    #[test]
    fn unknown_refund_class_is_rejected() {
        let err = EngineConfig::from_config_json(&json!({
            "refund": { "error_codes": { "x": "ignore" } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("refund error class"));
    }
}
