//! sfr-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, wires
//! Postgres, the gateway and the outbox drain, then starts the HTTP server.
//! Handlers live in `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sfr_daemon::{bootstrap, routes, state};
use sfr_db::PgLedger;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let rc = bootstrap::load_runtime_config(&bootstrap::config_paths_from_env())
        .context("config load failed")?;
    info!(
        mode = rc.mode.as_str(),
        config_hash = %rc.loaded.config_hash,
        "config loaded"
    );

    let pool = sfr_db::connect_from_env().await?;
    sfr_db::migrate(&pool).await?;
    let ledger = Arc::new(PgLedger::new(pool));

    let services =
        bootstrap::build_services(ledger, &rc, &bootstrap::dispatcher_id("sfr-daemon"))?;

    state::spawn_outbox_drain(
        Arc::clone(&services.dispatcher),
        rc.engine.notifications.drain_interval,
    );

    let shared = Arc::new(
        state::AppState::new(
            services.coordinator,
            services.dispatcher,
            rc.secrets.gateway_secret_key.clone(),
            rc.mode,
        )
        .with_config_hash(rc.loaded.config_hash.clone()),
    );

    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8787)));
    info!("sfr-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(bootstrap::ENV_DAEMON_ADDR).ok()?.parse().ok()
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

/// CORS: the storefront dev servers on localhost only. The webhook is
/// server-to-server and needs no CORS.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
