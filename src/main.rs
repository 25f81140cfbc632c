//! itemforge · Structured assessment-item generation service
//!
//! - Axum HTTP API exposing one generate contract
//! - Resilient pipeline over an unreliable completion backend
//!   (normalize → repair → validate → singleton backfill → aggregate)
//! - OpenAI integration (via environment variables)
//!
//! Important env variables:
//!   PORT                  : u16 (default 3000)
//!   OPENAI_API_KEY        : enables the completion backend if present
//!   OPENAI_BASE_URL       : default "https://api.openai.com/v1"
//!   OPENAI_MODEL          : default "gpt-4o-mini"
//!   GENERATOR_CONFIG_PATH : path to TOML config (prompts, pipeline settings, existing stems)
//!   LOG_LEVEL             : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT            : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod config;
mod completion;
mod openai;
mod stems;
mod prompt;
mod normalize;
mod repair;
mod validate;
mod backfill;
mod pipeline;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Shared, read-only application state (prompts, stem bank, generator).
  let state = Arc::new(AppState::new());

  let app = build_router(state);

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "itemforge", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

/// Resolves on Ctrl-C so in-flight requests can finish.
async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "itemforge", error = %e, "Failed to install Ctrl-C handler");
    std::future::pending::<()>().await;
  }
  info!(target: "itemforge", "Shutdown signal received");
}
