//! FROST signing sessions and the in-memory session table.
//!
//! A session drives one three-round signing ceremony over the local
//! secret share: commit (round 1 of FROST), sign (round 2), aggregate.
//! Protocol messages are framed as `[party_id || payload]` so the
//! receiver can attribute each payload to a FROST identifier.

use crate::hrs::HrsKey;
use crate::keyshare::KeyShare;
use frost_ed25519 as frost;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Statically configured cosigner identifier, 1..=255.
pub type PartyId = u8;

/// Errors from the signing engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session timed out")]
    Expired,
    #[error("local party {0} not in the quorum")]
    LocalNotInQuorum(PartyId),
    #[error("invalid party id {0}")]
    InvalidParty(PartyId),
    #[error("message from party {0} outside the quorum")]
    UnknownParty(PartyId),
    #[error("duplicate message from party {0}")]
    DuplicateMessage(PartyId),
    #[error("collected {got} messages, quorum needs {expected}")]
    MissingMessages { expected: usize, got: usize },
    #[error("malformed protocol message")]
    MalformedMessage,
    #[error("protocol round out of order")]
    OutOfOrder,
    #[error("FROST error: {0}")]
    Frost(String),
}

fn identifier(id: PartyId) -> Result<frost::Identifier, EngineError> {
    frost::Identifier::try_from(id as u16).map_err(|_| EngineError::InvalidParty(id))
}

/// Split `[party_id || payload]` frames into a per-identifier map,
/// rejecting senders outside the expected set and duplicates.
fn collect_frames<T>(
    frames: &[Vec<u8>],
    parties: &[PartyId],
    decode: impl Fn(&[u8]) -> Result<T, frost::Error>,
) -> Result<BTreeMap<frost::Identifier, T>, EngineError> {
    let mut out = BTreeMap::new();
    for frame in frames {
        let (&pid, payload) = frame.split_first().ok_or(EngineError::MalformedMessage)?;
        if payload.is_empty() {
            return Err(EngineError::MalformedMessage);
        }
        if !parties.contains(&pid) {
            return Err(EngineError::UnknownParty(pid));
        }
        let value = decode(payload).map_err(|e| EngineError::Frost(e.to_string()))?;
        if out.insert(identifier(pid)?, value).is_some() {
            return Err(EngineError::DuplicateMessage(pid));
        }
    }
    if out.len() != parties.len() {
        return Err(EngineError::MissingMessages {
            expected: parties.len(),
            got: out.len(),
        });
    }
    Ok(out)
}

/// One in-flight signing ceremony.
///
/// Holds the quorum it was opened for, the exact bytes being signed
/// and the round state. Expires after the configured session timeout;
/// an expired session fails its next step, which makes the signer
/// delete it.
pub struct SignSession {
    local_id: PartyId,
    parties: Vec<PartyId>,
    sign_bytes: Vec<u8>,
    deadline: Instant,
    nonces: Option<frost::round1::SigningNonces>,
    signing_package: Option<frost::SigningPackage>,
}

impl SignSession {
    pub fn new(
        local_id: PartyId,
        party_ids: &[PartyId],
        sign_bytes: &[u8],
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let mut parties = party_ids.to_vec();
        parties.sort_unstable();
        parties.dedup();
        if parties.contains(&0) {
            return Err(EngineError::InvalidParty(0));
        }
        if !parties.contains(&local_id) {
            return Err(EngineError::LocalNotInQuorum(local_id));
        }
        Ok(Self {
            local_id,
            parties,
            sign_bytes: sign_bytes.to_vec(),
            deadline: Instant::now() + timeout,
            nonces: None,
            signing_package: None,
        })
    }

    pub fn sign_bytes(&self) -> &[u8] {
        &self.sign_bytes
    }

    fn check_deadline(&self) -> Result<(), EngineError> {
        if Instant::now() >= self.deadline {
            Err(EngineError::Expired)
        } else {
            Ok(())
        }
    }

    /// Round 1: generate nonces, emit the local commitment frame.
    pub fn commit(&mut self, key_share: &KeyShare) -> Result<Vec<u8>, EngineError> {
        self.check_deadline()?;
        if self.nonces.is_some() {
            return Err(EngineError::OutOfOrder);
        }

        let mut rng = rand::thread_rng();
        let (nonces, commitments) =
            frost::round1::commit(key_share.key_package.signing_share(), &mut rng);
        let payload = commitments
            .serialize()
            .map_err(|e| EngineError::Frost(e.to_string()))?;
        self.nonces = Some(nonces);

        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(self.local_id);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Round 2: consume the quorum's commitments, emit the local
    /// signature share frame.
    pub fn sign(
        &mut self,
        key_share: &KeyShare,
        msg1_out: &[Vec<u8>],
    ) -> Result<Vec<u8>, EngineError> {
        self.check_deadline()?;
        let nonces = self.nonces.as_ref().ok_or(EngineError::OutOfOrder)?;
        if self.signing_package.is_some() {
            return Err(EngineError::OutOfOrder);
        }

        let commitments = collect_frames(msg1_out, &self.parties, |payload| {
            frost::round1::SigningCommitments::deserialize(payload)
        })?;
        let package = frost::SigningPackage::new(commitments, &self.sign_bytes);

        let share = frost::round2::sign(&package, nonces, &key_share.key_package)
            .map_err(|e| EngineError::Frost(e.to_string()))?;
        self.signing_package = Some(package);

        let payload = share.serialize();
        let mut frame = Vec::with_capacity(1 + payload.len());
        frame.push(self.local_id);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Terminal round: aggregate the quorum's signature shares into
    /// the 64-byte Ed25519 signature.
    pub fn aggregate(
        &self,
        key_share: &KeyShare,
        msg2_out: &[Vec<u8>],
    ) -> Result<[u8; 64], EngineError> {
        self.check_deadline()?;
        let package = self.signing_package.as_ref().ok_or(EngineError::OutOfOrder)?;

        let shares = collect_frames(msg2_out, &self.parties, |payload| {
            frost::round2::SignatureShare::deserialize(payload)
        })?;

        let signature = frost::aggregate(package, &shares, &key_share.public_key_package)
            .map_err(|e| EngineError::Frost(e.to_string()))?;
        let bytes = signature
            .serialize()
            .map_err(|e| EngineError::Frost(e.to_string()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| EngineError::Frost(format!("signature is {} bytes", bytes.len())))
    }
}

/// In-flight sessions keyed by (height, round, step).
///
/// Owned exclusively by the local signer; every call happens under its
/// lock. Entries leave only through `remove`, `gc_less_than` or a
/// failed engine step.
#[derive(Default)]
pub struct SessionTable {
    sessions: BTreeMap<HrsKey, SignSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &HrsKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Insert a session; returns false when one already exists.
    pub fn open(&mut self, key: HrsKey, session: SignSession) -> bool {
        use std::collections::btree_map::Entry;
        match self.sessions.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn get_mut(&mut self, key: &HrsKey) -> Option<&mut SignSession> {
        self.sessions.get_mut(key)
    }

    pub fn remove(&mut self, key: &HrsKey) {
        self.sessions.remove(key);
    }

    /// Drop every session strictly below `key`. No part for a lower
    /// HRS will ever be provided again once the watermark passed it.
    pub fn gc_less_than(&mut self, key: &HrsKey) {
        self.sessions = self.sessions.split_off(key);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
