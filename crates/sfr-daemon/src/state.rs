//! Shared runtime state for sfr-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Everything in here is
//! either immutable after startup or an `Arc` to something that does its own
//! synchronization.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sfr_config::ConfigMode;
use sfr_engine::{Coordinator, NotificationDispatcher};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Gateway secret used to check webhook signatures. `None` means every
    /// webhook is refused with 500 until the operator sets it.
    pub webhook_secret: Option<String>,
    /// Lowercase header name carrying the webhook signature.
    pub signature_header: String,
    pub mode: ConfigMode,
    /// Hash of the effective config this process booted with.
    pub config_hash: Option<String>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(
        coordinator: Arc<Coordinator>,
        dispatcher: Arc<NotificationDispatcher>,
        webhook_secret: Option<String>,
        mode: ConfigMode,
    ) -> Self {
        let signature_header = coordinator.config().webhook_signature_header.clone();
        Self {
            coordinator,
            dispatcher,
            webhook_secret,
            signature_header,
            mode,
            config_hash: None,
            build: BuildInfo {
                service: "sfr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that drains the notification outbox every
/// `interval`. Storage errors are logged and the next tick tries again.
pub fn spawn_outbox_drain(dispatcher: Arc<NotificationDispatcher>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match dispatcher.drain_all(OUTBOX_BATCHES_PER_TICK).await {
                Ok(r) if r.claimed > 0 => tracing::info!(
                    claimed = r.claimed,
                    sent = r.sent,
                    requeued = r.requeued,
                    failed = r.failed,
                    "outbox drained"
                ),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "outbox drain failed"),
            }
        }
    });
}

const OUTBOX_BATCHES_PER_TICK: usize = 10;
