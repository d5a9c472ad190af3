//! Keygen message relay
//!
//! Store-and-forward pub/sub broker for the one-shot key generation
//! ceremony: every published message is appended to an ordered log and
//! handed to any party polling past its cursor. Purely an operational
//! artifact; it holds no key material and is shut down after the
//! ceremony.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use frost_cosigner::types::{BusPollResponse, BusPublishRequest, BusPublishResponse};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dkg-relay")]
#[command(about = "Pub/sub relay for the FROST keygen ceremony")]
#[command(version)]
struct Cli {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0:7200")]
    bind: String,
}

#[derive(Default)]
struct RelayState {
    messages: RwLock<Vec<Vec<String>>>,
}

#[derive(Debug, Deserialize)]
struct PollParams {
    #[serde(default)]
    cursor: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dkg_relay=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let state = Arc::new(RelayState::default());

    let app = Router::new()
        .route("/v1/publish", post(publish_handler))
        .route("/v1/poll", get(poll_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(bind = %cli.bind, "relay listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn publish_handler(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<BusPublishRequest>,
) -> Json<BusPublishResponse> {
    let mut messages = state.messages.write().unwrap();
    messages.push(request.frames.clone());
    let seq = messages.len() as u64;
    tracing::debug!(seq, frames = request.frames.len(), "forwarded message");
    Json(BusPublishResponse { seq })
}

async fn poll_handler(
    State(state): State<Arc<RelayState>>,
    Query(params): Query<PollParams>,
) -> Json<BusPollResponse> {
    let messages = state.messages.read().unwrap();
    let start = (params.cursor as usize).min(messages.len());
    Json(BusPollResponse {
        messages: messages[start..].to_vec(),
        next_cursor: messages.len() as u64,
    })
}
