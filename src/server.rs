//! HTTP request server for the cosigner RPC.
//!
//! A single endpoint receives the closed set of request shapes and
//! dispatches to the local cosigner. Every received request produces
//! exactly one reply; the reply shape, not the HTTP status, carries
//! the outcome.

use crate::cosigner::LocalCosigner;
use crate::error::CosignError;
use crate::types::{decode_frames, encode_frames, CosignReply, CosignRequest, HealthResponse};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared across handlers
pub struct AppState {
    pub local: Arc<LocalCosigner>,
}

/// Create the router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/cosign", post(cosign_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready".to_string(),
        cosigner_id: state.local.id(),
    })
}

async fn cosign_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CosignRequest>, JsonRejection>,
) -> Json<CosignReply> {
    let Ok(Json(request)) = payload else {
        return Json(CosignReply::Error {
            message: "unknown request type".to_string(),
        });
    };
    Json(dispatch(&state.local, request))
}

fn dispatch(local: &LocalCosigner, request: CosignRequest) -> CosignReply {
    match request {
        CosignRequest::StartSession {
            party_id,
            sign_bytes,
            party_ids,
        } => {
            let (bytes, parties) = match (hex::decode(&sign_bytes), hex::decode(&party_ids)) {
                (Ok(bytes), Ok(parties)) => (bytes, parties),
                _ => return error_reply("invalid hex field"),
            };
            if bytes.is_empty() || parties.is_empty() {
                return error_reply("empty request field");
            }
            tracing::debug!(from = party_id, "start session request");
            round_reply(local.start_session(&bytes, &parties))
        }
        CosignRequest::EndSession {
            party_id,
            sign_bytes,
            msg1_out,
            ..
        } => {
            let bytes = match hex::decode(&sign_bytes) {
                Ok(bytes) => bytes,
                Err(_) => return error_reply("invalid hex field"),
            };
            let frames = match decode_frames(&msg1_out) {
                Ok(frames) => frames,
                Err(_) => return error_reply("invalid hex field"),
            };
            if bytes.is_empty() {
                return error_reply("empty request field");
            }
            tracing::debug!(from = party_id, frames = frames.len(), "end session request");
            round_reply(local.end_session(&bytes, &frames))
        }
        CosignRequest::SetSignature {
            party_id,
            sign_bytes,
            sig,
        } => {
            let (bytes, signature) = match (hex::decode(&sign_bytes), hex::decode(&sig)) {
                (Ok(bytes), Ok(signature)) => (bytes, signature),
                _ => return error_reply("invalid hex field"),
            };
            if bytes.is_empty() || signature.is_empty() {
                return error_reply("empty request field");
            }
            tracing::debug!(from = party_id, "set signature request");
            match local.set_signature(&bytes, &signature) {
                Ok(()) => CosignReply::Ok,
                Err(e) => error_reply(e.to_string()),
            }
        }
    }
}

fn round_reply(result: Result<Vec<Vec<u8>>, CosignError>) -> CosignReply {
    match result {
        Ok(frames) => CosignReply::Messages {
            frames: encode_frames(&frames),
        },
        Err(CosignError::SignedBefore { signature, .. }) => CosignReply::Signature {
            sig: hex::encode(signature),
        },
        Err(e) => error_reply(e.to_string()),
    }
}

fn error_reply(message: impl Into<String>) -> CosignReply {
    CosignReply::Error {
        message: message.into(),
    }
}
