//! Threshold validator: orchestrates a full block-signing ceremony by
//! composing the local cosigner with the remote peers.

use crate::cosigner::LocalCosigner;
use crate::error::CosignError;
use crate::hrs::{HrsKey, Step};
use crate::remote::RemoteCosigners;
use crate::sign_bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteType {
    Prevote,
    Precommit,
}

/// A consensus vote to be signed.
#[derive(Debug, Clone)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: i64,
    pub round: i64,
    pub block_id: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub signature: Vec<u8>,
}

/// A block proposal to be signed.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub height: i64,
    pub round: i64,
    pub block_id: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub signature: Vec<u8>,
}

struct Block {
    key: HrsKey,
    sign_bytes: Vec<u8>,
    timestamp: DateTime<Utc>,
}

/// Host-facing signer. Safe for concurrent callers: every operation
/// that touches the peer client runs under one outer mutex, which is
/// also the external serialization the peer client relies on.
pub struct ThresholdValidator {
    pubkey: [u8; 32],
    cosigner: Arc<LocalCosigner>,
    peers: Mutex<RemoteCosigners>,
}

impl ThresholdValidator {
    pub fn new(cosigner: Arc<LocalCosigner>, peers: RemoteCosigners) -> Result<Self, CosignError> {
        let pubkey = cosigner.group_key()?;
        Ok(Self {
            pubkey,
            cosigner,
            peers: Mutex::new(peers),
        })
    }

    /// 32-byte Ed25519 group public key of the validator.
    pub fn pub_key(&self) -> [u8; 32] {
        self.pubkey
    }

    /// Sign a vote. On success the signature is stamped onto the vote
    /// and the timestamp preserved from the caller, unless an earlier
    /// sign of the same vote is returned from the cache.
    pub async fn sign_vote(&self, chain_id: &str, vote: &mut Vote) -> Result<(), CosignError> {
        let step = match vote.vote_type {
            VoteType::Prevote => Step::Prevote,
            VoteType::Precommit => Step::Precommit,
        };
        let block = block_for(
            chain_id,
            step,
            vote.height,
            vote.round,
            vote.timestamp,
            &vote.block_id,
        )?;
        let (signature, timestamp) = self.sign_block(block).await?;
        vote.signature = signature;
        vote.timestamp = timestamp;
        Ok(())
    }

    /// Sign a proposal. Same contract as [`Self::sign_vote`].
    pub async fn sign_proposal(
        &self,
        chain_id: &str,
        proposal: &mut Proposal,
    ) -> Result<(), CosignError> {
        let block = block_for(
            chain_id,
            Step::Proposal,
            proposal.height,
            proposal.round,
            proposal.timestamp,
            &proposal.block_id,
        )?;
        let (signature, timestamp) = self.sign_block(block).await?;
        proposal.signature = signature;
        proposal.timestamp = timestamp;
        Ok(())
    }

    async fn sign_block(&self, block: Block) -> Result<(Vec<u8>, DateTime<Utc>), CosignError> {
        let stamp = block.timestamp;
        let mut peers = self.peers.lock().await;

        let party_ids = peers.reset_parties();

        let mut msg1 = match self.cosigner.start_session(&block.sign_bytes, &party_ids) {
            Ok(frames) => frames,
            Err(e) => return cached_or_fail(e, stamp),
        };
        match peers.start_session(&block.sign_bytes, &party_ids).await {
            Ok(frames) => msg1.extend(frames),
            Err(e) => return cached_or_fail(e, stamp),
        }

        let mut msg2 = match self.cosigner.end_session(&block.sign_bytes, &msg1) {
            Ok(frames) => frames,
            Err(e) => return cached_or_fail(e, stamp),
        };
        match peers.end_session(&block.sign_bytes, &party_ids, &msg1).await {
            Ok(frames) => msg2.extend(frames),
            Err(e) => return cached_or_fail(e, stamp),
        }

        let signature = self.cosigner.final_sign(block.key, &msg2)?;

        // Best-effort: cosigners outside the quorum record the same
        // watermark.
        peers.set_signature(&block.sign_bytes, &signature).await;

        tracing::info!(key = %block.key, "block signed");
        Ok((signature.to_vec(), stamp))
    }
}

fn block_for(
    chain_id: &str,
    step: Step,
    height: i64,
    round: i64,
    timestamp: DateTime<Utc>,
    block_id: &[u8],
) -> Result<Block, CosignError> {
    let timestamp_ns = timestamp
        .timestamp_nanos_opt()
        .ok_or_else(|| CosignError::MalformedSignBytes("timestamp out of range".to_string()))?;
    Ok(Block {
        key: HrsKey::new(height, round, step),
        sign_bytes: sign_bytes::encode(chain_id, step, height, round, timestamp_ns, block_id),
        timestamp,
    })
}

/// A `SignedBefore` outcome is a success: return the cached signature
/// and the timestamp it was produced for, falling back to the
/// caller's timestamp when the cached one is unknown.
fn cached_or_fail(
    error: CosignError,
    stamp: DateTime<Utc>,
) -> Result<(Vec<u8>, DateTime<Utc>), CosignError> {
    match error {
        CosignError::SignedBefore {
            signature,
            timestamp,
        } => Ok((signature, timestamp.unwrap_or(stamp))),
        other => Err(other),
    }
}
