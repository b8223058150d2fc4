//! Process wiring shared by the daemon and the operator CLI: layered config,
//! secrets, the gateway client, the notification sender and the Coordinator.

use std::sync::Arc;

use anyhow::{Context, Result};
use sfr_config::{
    load_layered_yaml, load_layered_yaml_from_strings, report_unused_keys, resolve_secrets_for_mode,
    ConfigMode, EngineConfig, LoadedConfig, ResolvedSecrets, UnusedKeyPolicy,
};
use sfr_engine::{Coordinator, Ledger, LogSender, NotificationDispatcher, NotificationSender};
use sfr_gateway_paystack::PaystackGateway;
use tracing::{info, warn};

use crate::relay::RelaySender;

/// Comma-separated YAML paths in merge order (base first).
pub const ENV_CONFIG_PATHS: &str = "SFR_CONFIG_PATHS";
pub const ENV_DAEMON_ADDR: &str = "SFR_DAEMON_ADDR";

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub loaded: LoadedConfig,
    pub mode: ConfigMode,
    pub engine: EngineConfig,
    pub secrets: ResolvedSecrets,
    /// Leaves present in the config that nothing reads.
    pub unused_keys: Vec<String>,
}

/// Paths from `SFR_CONFIG_PATHS`; empty when unset.
pub fn config_paths_from_env() -> Vec<String> {
    std::env::var(ENV_CONFIG_PATHS)
        .map(|v| split_paths(&v))
        .unwrap_or_default()
}

fn split_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load and validate the layered config, then resolve secrets for its mode.
/// No paths means built-in defaults (SANDBOX).
pub fn load_runtime_config(paths: &[String]) -> Result<RuntimeConfig> {
    let loaded = if paths.is_empty() {
        load_layered_yaml_from_strings(&[])?
    } else {
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        load_layered_yaml(&refs)?
    };
    runtime_config_from_loaded(loaded)
}

pub fn runtime_config_from_loaded(loaded: LoadedConfig) -> Result<RuntimeConfig> {
    let mode = ConfigMode::from_config_json(&loaded.config_json)?;
    let unused = report_unused_keys(mode, &loaded.config_json, UnusedKeyPolicy::Warn)?;
    let engine = EngineConfig::from_config_json(&loaded.config_json)
        .context("engine config invalid")?;
    let secrets = resolve_secrets_for_mode(&loaded.config_json, mode)?;
    Ok(RuntimeConfig {
        loaded,
        mode,
        engine,
        secrets,
        unused_keys: unused.unused_leaf_pointers,
    })
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

pub struct Services {
    pub coordinator: Arc<Coordinator>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

/// Build the gateway, sender, dispatcher and Coordinator over `ledger`.
pub fn build_services(
    ledger: Arc<dyn Ledger>,
    rc: &RuntimeConfig,
    dispatcher_id: &str,
) -> Result<Services> {
    for key in &rc.unused_keys {
        warn!(key = %key, "config key is not used by this service");
    }

    let secret = match rc.secrets.gateway_secret_key.clone() {
        Some(s) => s,
        None => {
            warn!(
                var = %rc.secrets.gateway_secret_key_var,
                "gateway secret not set; verify, refund and webhook calls will fail"
            );
            String::new()
        }
    };
    let gateway = PaystackGateway::new_with_base_url(
        secret,
        rc.engine.gateway_base_url.clone(),
        rc.engine.gateway_timeout,
    )?;

    let sender: Arc<dyn NotificationSender> = match rc.secrets.notification_relay_url.as_deref() {
        Some(url) => Arc::new(RelaySender::new(url, rc.engine.gateway_timeout)?),
        None => {
            info!("no notification relay configured; notifications are logged only");
            Arc::new(LogSender)
        }
    };

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&ledger),
        sender,
        rc.engine.notifications.clone(),
        dispatcher_id,
    ));
    let coordinator = Arc::new(
        Coordinator::new(ledger, Arc::new(gateway), rc.engine.clone())
            .with_dispatcher(Arc::clone(&dispatcher)),
    );

    Ok(Services {
        coordinator,
        dispatcher,
    })
}

/// Outbox claim owner for this process.
pub fn dispatcher_id(role: &str) -> String {
    format!("{role}-{}", std::process::id())
}
