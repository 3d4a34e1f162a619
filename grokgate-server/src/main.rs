//! grokgate server — an OpenAI-compatible chat gateway that rotates a
//! pool of browser-session credentials against the upstream service.
//!
//! Surfaces:
//! - `/v1/chat/completions`, `/v1/models` — the OpenAI-compatible API
//! - `/get/tokens`, `/add/token`, `/delete/token`, `/set/cf_clearance`
//!   — operator endpoints guarded by the gateway API key

use std::net::SocketAddr;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod router;
mod scheduler;
mod state;

use grokgate_core::config::AppConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let port = config.port;
    let state = AppState::new(config)?;
    state.bootstrap_tokens();

    let _recovery = scheduler::start_recovery_task(state.pool());

    let app = router::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "grokgate listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
