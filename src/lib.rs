//! Distributed FROST Ed25519 threshold signer for Tendermint-style
//! validators.
//!
//! A validator's signing key is split across N cosigner nodes by a
//! FROST key-generation ceremony; any threshold + 1 of them jointly
//! produce a standard 64-byte Ed25519 signature over a vote or
//! proposal. Fewer shares reveal nothing about the key, and a durable
//! per-cosigner watermark makes double-signing at the same
//! (height, round, step) impossible even across restarts.
//!
//! # Architecture
//!
//! - [`cosigner::LocalCosigner`] drives the three FROST rounds over
//!   the local secret share, guarded by the watermark and session
//!   table.
//! - [`remote::RemoteCosigners`] fans each round out to the peer
//!   cosigners and tracks their liveness.
//! - [`validator::ThresholdValidator`] composes the two into the
//!   host-facing `sign_vote` / `sign_proposal` / `pub_key` interface.
//! - [`server`] exposes the local cosigner to its peers over the
//!   cosigner RPC.
//! - [`dkg`] runs the one-shot key-generation ceremony over a
//!   broker-mediated bus.

pub mod config;
pub mod cosigner;
pub mod dkg;
pub mod error;
pub mod hrs;
pub mod keyshare;
pub mod remote;
pub mod server;
pub mod session;
pub mod sign_bytes;
pub mod sign_state;
pub mod types;
pub mod validator;

pub use config::{Config, ConfigError};
pub use cosigner::LocalCosigner;
pub use error::CosignError;
pub use hrs::{HrsKey, Step};
pub use keyshare::{KeyShare, KeyShareError};
pub use remote::RemoteCosigners;
pub use server::{create_router, AppState};
pub use session::{PartyId, SessionTable, SignSession};
pub use sign_state::SignState;
pub use validator::{Proposal, ThresholdValidator, Vote, VoteType};
