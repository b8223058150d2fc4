//! Command handler modules for the sfr CLI.
//!
//! Shared wiring lives here; command-specific logic lives in the submodules.

pub mod order;
pub mod outbox;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sfr_config::{report_unused_keys, ConfigMode, UnusedKeyPolicy};
use sfr_daemon::bootstrap::{self, Services};
use sfr_db::PgLedger;

/// Explicit `--config` paths win; otherwise `SFR_CONFIG_PATHS`.
fn effective_paths(config_paths: &[String]) -> Vec<String> {
    if config_paths.is_empty() {
        bootstrap::config_paths_from_env()
    } else {
        config_paths.to_vec()
    }
}

/// Connect, then build the engine over Postgres exactly as the daemon does.
pub(crate) async fn engine_over_db(config_paths: &[String], role: &str) -> Result<Services> {
    let rc = bootstrap::load_runtime_config(&effective_paths(config_paths))
        .context("config load failed")?;
    let pool = sfr_db::connect_from_env().await?;
    let ledger = Arc::new(PgLedger::new(pool));
    bootstrap::build_services(ledger, &rc, &bootstrap::dispatcher_id(role))
}

pub fn config_hash(paths: &[String], strict: bool) -> Result<()> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = sfr_config::load_layered_yaml(&path_refs)?;
    let mode = ConfigMode::from_config_json(&loaded.config_json)?;
    // Validate the typed view too so a bad value fails here, not at daemon boot.
    sfr_config::EngineConfig::from_config_json(&loaded.config_json)?;

    let report = report_unused_keys(mode, &loaded.config_json, UnusedKeyPolicy::Warn)?;

    println!("config_hash={}", loaded.config_hash);
    println!("mode={}", mode.as_str());
    for key in &report.unused_leaf_pointers {
        eprintln!("unused_key={key}");
    }
    println!("{}", loaded.canonical_json);

    if strict && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused key(s)",
            report.unused_leaf_pointers.len()
        );
    }
    Ok(())
}
