//! Scenario Forge · role-play scenario backend
//!
//! - Axum HTTP API: create/edit scenarios, speech-to-text, text-to-speech
//! - Gemini for structured scenario generation (streamed)
//! - MongoDB persistence (in-memory fallback), optional workflow API, Deepgram speech
//!
//! Important env variables:
//!   PORT                 : u16 (default 8888)
//!   GEMINI_API_KEY       : enables Gemini; without it generation yields the AI fallback
//!   GEMINI_BASE_URL      : default "https://generativelanguage.googleapis.com/v1beta"
//!   MONGO_URL            : MongoDB connection string; absent -> in-memory store
//!   DEEPGRAM_API_KEY     : enables /stt and /tts
//!   VOXIO_API_KEY        : enables the workflow API (VOXIO_BASE_URL to override)
//!   ALLOWED_ORIGINS / ALLOWED_CREDENTIALS / ALLOWED_METHODS / ALLOWED_HEADERS : CORS
//!   SCENARIO_CONFIG_PATH : path to TOML settings (default "config.toml")
//!   LOG_LEVEL            : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT           : "pretty" (default) or "json"

mod config;
mod domain;
mod gemini;
mod generation;
mod literal;
mod mongo;
mod protocol;
mod routes;
mod service;
mod speech;
mod state;
mod store;
mod telemetry;
mod util;
mod workflow;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{load_settings_from_env, CorsSettings};
use crate::routes::build_router;
use crate::state::AppState;

const DEFAULT_PORT: u16 = 8888;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // .env is optional; real env vars win.
  dotenvy::dotenv().ok();

  let (settings, origin) = load_settings_from_env();
  telemetry::init_tracing(&settings.logger);
  origin.log();

  let cors = CorsSettings::from_env();
  info!(target: "scenario_forge", origins = ?cors.allowed_origins, credentials = cors.allow_credentials, "CORS configured");

  // Shared state: generator, store, workflow and speech clients.
  let state = Arc::new(AppState::from_env(settings).await?);
  info!(
    target: "scenario_forge",
    store = state.service.store_backend(),
    workflow = state.service.workflow_enabled(),
    "Scenario service ready"
  );

  let app = build_router(state, &cors);

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "scenario_forge", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!(target: "scenario_forge", "Server stopped");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "scenario_forge", error = %e, "Failed to listen for shutdown signal");
  }
}
