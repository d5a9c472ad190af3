//! Error taxonomy of the signing core.

use crate::hrs::HrsKey;
use crate::session::EngineError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the signing core to its RPC surface.
///
/// `SignedBefore` is a successful outcome for the caller: it carries
/// the signature that was already produced for these exact bytes, so
/// retries are idempotent.
#[derive(Debug, Error)]
pub enum CosignError {
    #[error("height regression: stored {stored}, requested {requested}")]
    WatermarkRegressed { stored: HrsKey, requested: HrsKey },

    #[error("signed before")]
    SignedBefore {
        signature: Vec<u8>,
        /// Timestamp inside the previously signed bytes, when known.
        timestamp: Option<DateTime<Utc>>,
    },

    #[error("mismatched data: different sign bytes at the same height/round/step")]
    MismatchedData,

    #[error("wrong chain ID: expected {expected}, got {got}")]
    WrongChain { expected: String, got: String },

    #[error("already being signed on: {0}")]
    AlreadyInProgress(HrsKey),

    #[error("invalid session: {0}")]
    InvalidSession(HrsKey),

    #[error("wrong signing payload")]
    WrongSigningPayload,

    #[error("incorrect signature length: {0}")]
    BadSignatureLength(usize),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("not enough messages collected: {collected} of {required}")]
    NotEnoughMessages { collected: usize, required: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("crypto engine: {0}")]
    Crypto(#[from] EngineError),

    #[error("malformed sign bytes: {0}")]
    MalformedSignBytes(String),

    #[error("state file: {0}")]
    State(String),

    #[error("key share: {0}")]
    KeyShare(#[from] crate::keyshare::KeyShareError),
}
