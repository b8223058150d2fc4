//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"PAYSTACK_SECRET_KEY"`).
//! - At startup, callers invoke `resolve_secrets_for_mode()` once and pass the
//!   returned `ResolvedSecrets` into constructors.
//! - `Debug` redacts values. Error messages name the env var, never the value.
//!
//! | Mode    | Required               |
//! |---------|------------------------|
//! | LIVE    | gateway secret key     |
//! | SANDBOX | nothing                |
//!
//! The notification relay URL is optional in every mode.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::ConfigMode;

pub const DEFAULT_SECRET_KEY_ENV: &str = "PAYSTACK_SECRET_KEY";

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Gateway secret key. Signs webhooks and authenticates API calls.
    pub gateway_secret_key: Option<String>,
    /// Where rendered notifications are relayed; carries credentials in the URL.
    pub notification_relay_url: Option<String>,
    /// Env var name the secret key was read from, for error messages.
    pub gateway_secret_key_var: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "gateway_secret_key",
                &self.gateway_secret_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "notification_relay_url",
                &self.notification_relay_url.as_ref().map(|_| "<REDACTED>"),
            )
            .field("gateway_secret_key_var", &self.gateway_secret_key_var)
            .finish()
    }
}

struct SecretEnvNames {
    gateway_secret_key_var: String,
    notification_relay_url_var: Option<String>,
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// `None` when unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn parse_env_names(config_json: &Value) -> SecretEnvNames {
    SecretEnvNames {
        gateway_secret_key_var: read_str_at(config_json, "/gateway/keys_env/secret_key")
            .unwrap_or_else(|| DEFAULT_SECRET_KEY_ENV.to_string()),
        notification_relay_url_var: read_str_at(config_json, "/notifications/relay_url_env"),
    }
}

/// Resolve all secrets from the environment for `mode`.
///
/// # Errors
/// Names the first missing required env var.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: ConfigMode) -> Result<ResolvedSecrets> {
    let names = parse_env_names(config_json);

    let gateway_secret_key = resolve_env(&names.gateway_secret_key_var);
    if mode == ConfigMode::Live && gateway_secret_key.is_none() {
        bail!(
            "SECRETS_MISSING mode=LIVE: required env var '{}' \
             (gateway secret key) is not set or empty",
            names.gateway_secret_key_var,
        );
    }

    Ok(ResolvedSecrets {
        gateway_secret_key,
        notification_relay_url: names
            .notification_relay_url_var
            .as_deref()
            .and_then(resolve_env),
        gateway_secret_key_var: names.gateway_secret_key_var,
    })
}
