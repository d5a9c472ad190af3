//! The local cosigner: drives FROST rounds over the local secret
//! share and guards every signing action with the durable watermark.
//!
//! All four operations run under one mutex held for the whole call,
//! so the watermark check, the session-table mutation and the engine
//! step are a single atomic step. Engine steps are synchronous and
//! the watermark write is synchronous file I/O; nothing awaits while
//! the lock is held.

use crate::config::Config;
use crate::error::CosignError;
use crate::hrs::HrsKey;
use crate::keyshare::{self, KeyShare};
use crate::session::{PartyId, SessionTable, SignSession};
use crate::sign_bytes;
use crate::sign_state::SignState;
use frost_ed25519 as frost;
use std::sync::Mutex;
use std::time::Duration;

struct CosignerState {
    last: SignState,
    table: SessionTable,
}

/// Responds to sign requests using the local key share, maintaining a
/// watermark to avoid double-signing. Thread safe.
pub struct LocalCosigner {
    id: PartyId,
    chain_id: String,
    timeout: Duration,
    key_share: KeyShare,
    state: Mutex<CosignerState>,
}

impl LocalCosigner {
    pub fn new(config: &Config) -> Result<Self, CosignError> {
        let key_share = KeyShare::load(&config.key_share_file)?;
        let last = SignState::load_or_create(&config.state_file)?;
        Ok(Self::from_parts(
            config.cosigner_id,
            config.chain_id.clone(),
            config.session_timeout(),
            key_share,
            last,
        ))
    }

    pub fn from_parts(
        id: PartyId,
        chain_id: impl Into<String>,
        timeout: Duration,
        key_share: KeyShare,
        last: SignState,
    ) -> Self {
        Self {
            id,
            chain_id: chain_id.into(),
            timeout,
            key_share,
            state: Mutex::new(CosignerState {
                last,
                table: SessionTable::new(),
            }),
        }
    }

    pub fn id(&self) -> PartyId {
        self.id
    }

    pub fn verifying_key(&self) -> &frost::VerifyingKey {
        self.key_share.verifying_key()
    }

    /// 32-byte Ed25519 group public key.
    pub fn group_key(&self) -> Result<[u8; 32], CosignError> {
        Ok(self.key_share.group_key()?)
    }

    /// Number of in-flight sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().table.len()
    }

    fn parse_checked(&self, bytes: &[u8]) -> Result<HrsKey, CosignError> {
        let data = sign_bytes::parse(bytes)?;
        if data.chain_id != self.chain_id {
            return Err(CosignError::WrongChain {
                expected: self.chain_id.clone(),
                got: data.chain_id,
            });
        }
        Ok(data.key)
    }

    /// Triage for a request at the already-signed HRS. Identical bytes
    /// are an idempotent retry; a timestamp-only difference is a
    /// legitimate re-sign; anything else is a double-sign attempt.
    fn guard_resign(last: &SignState, bytes: &[u8]) -> Result<(), CosignError> {
        if last.sign_bytes == bytes {
            return Err(CosignError::SignedBefore {
                signature: last.signature.clone(),
                timestamp: last.timestamp(),
            });
        }
        if last.only_differ_by_timestamp(bytes).is_some() {
            Ok(())
        } else {
            Err(CosignError::MismatchedData)
        }
    }

    /// Round 0: open a session for the quorum and return the outgoing
    /// round-1 frames.
    pub fn start_session(
        &self,
        bytes: &[u8],
        party_ids: &[PartyId],
    ) -> Result<Vec<Vec<u8>>, CosignError> {
        let key = self.parse_checked(bytes)?;
        let mut state = self.state.lock().unwrap();

        if state.last.check_hrs(key)? {
            Self::guard_resign(&state.last, bytes)?;
        }
        if state.table.contains(&key) {
            return Err(CosignError::AlreadyInProgress(key));
        }

        let mut session = SignSession::new(self.id, party_ids, bytes, self.timeout)?;
        let frame = session.commit(&self.key_share)?;
        state.table.open(key, session);

        tracing::debug!(cosigner_id = self.id, key = %key, "opened signing session");
        Ok(vec![frame])
    }

    /// Round 1: feed the quorum's round-1 frames into the session and
    /// return the outgoing round-2 frames.
    pub fn end_session(
        &self,
        bytes: &[u8],
        msg1_out: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, CosignError> {
        let key = self.parse_checked(bytes)?;
        let mut state = self.state.lock().unwrap();

        if state.last.check_hrs(key)? {
            Self::guard_resign(&state.last, bytes)?;
        }

        let result = match state.table.get_mut(&key) {
            None => return Err(CosignError::InvalidSession(key)),
            Some(session) => {
                // The session is tied to the exact bytes it was opened
                // with; the timestamp exemption does not apply here.
                if session.sign_bytes() != bytes {
                    return Err(CosignError::WrongSigningPayload);
                }
                session.sign(&self.key_share, msg1_out)
            }
        };
        match result {
            Ok(frame) => Ok(vec![frame]),
            Err(e) => {
                state.table.remove(&key);
                Err(e.into())
            }
        }
    }

    /// Terminal round: aggregate the quorum's round-2 frames, advance
    /// the watermark and return the signature.
    pub fn final_sign(&self, key: HrsKey, msg2_out: &[Vec<u8>]) -> Result<[u8; 64], CosignError> {
        let mut state = self.state.lock().unwrap();

        let result = match state.table.get_mut(&key) {
            None => return Err(CosignError::InvalidSession(key)),
            Some(session) => session
                .aggregate(&self.key_share, msg2_out)
                .map(|sig| (sig, session.sign_bytes().to_vec())),
        };
        match result {
            Err(e) => {
                state.table.remove(&key);
                Err(e.into())
            }
            Ok((signature, bytes)) => {
                state.last.advance(key, &bytes, &signature)?;
                state.table.remove(&key);
                state.table.gc_less_than(&key);
                tracing::info!(cosigner_id = self.id, key = %key, "signed");
                Ok(signature)
            }
        }
    }

    /// Record a signature produced elsewhere so this cosigner carries
    /// the same watermark even when it was outside the quorum. The
    /// signature is verified against the group key before acceptance.
    pub fn set_signature(&self, bytes: &[u8], signature: &[u8]) -> Result<(), CosignError> {
        let key = self.parse_checked(bytes)?;
        let mut state = self.state.lock().unwrap();

        if state.last.check_hrs(key)? {
            if state.last.sign_bytes == bytes {
                return Err(CosignError::SignedBefore {
                    signature: state.last.signature.clone(),
                    timestamp: state.last.timestamp(),
                });
            }
            return Err(CosignError::MismatchedData);
        }

        if signature.len() != 64 {
            return Err(CosignError::BadSignatureLength(signature.len()));
        }
        if !keyshare::verify_raw(self.key_share.verifying_key(), bytes, signature) {
            return Err(CosignError::InvalidSignature);
        }

        state.last.advance(key, bytes, signature)?;
        state.table.remove(&key);
        state.table.gc_less_than(&key);
        tracing::debug!(cosigner_id = self.id, key = %key, "recorded peer signature");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrs::Step;
    use crate::keyshare::test_support::dealer_shares;
    use crate::sign_bytes::encode;
    use tempfile::{tempdir, TempDir};

    const CHAIN: &str = "test-chain";
    const QUORUM: [PartyId; 3] = [1, 2, 3];

    fn cosigners() -> (Vec<LocalCosigner>, TempDir) {
        let shares = dealer_shares(3, 2);
        let dir = tempdir().unwrap();
        let cosigners = shares
            .into_iter()
            .enumerate()
            .map(|(i, share)| {
                let id = (i + 1) as PartyId;
                let state =
                    SignState::load_or_create(dir.path().join(format!("state{id}.json"))).unwrap();
                LocalCosigner::from_parts(id, CHAIN, Duration::from_secs(10), share, state)
            })
            .collect();
        (cosigners, dir)
    }

    fn bytes_at(height: i64, round: i64, step: Step, ts: i64, payload: &[u8]) -> Vec<u8> {
        encode(CHAIN, step, height, round, ts, payload)
    }

    /// Drive one full ceremony across every cosigner, finalizing on
    /// the first and propagating the signature to the rest.
    fn sign_once(cosigners: &[LocalCosigner], bytes: &[u8]) -> [u8; 64] {
        let key = sign_bytes::parse(bytes).unwrap().key;
        let mut msg1 = Vec::new();
        for cosigner in cosigners {
            msg1.extend(cosigner.start_session(bytes, &QUORUM).unwrap());
        }
        let mut msg2 = Vec::new();
        for cosigner in cosigners {
            msg2.extend(cosigner.end_session(bytes, &msg1).unwrap());
        }
        let signature = cosigners[0].final_sign(key, &msg2).unwrap();
        // Best-effort, as the validator does it: a peer already at
        // this HRS declines the propagation.
        for cosigner in &cosigners[1..] {
            let _ = cosigner.set_signature(bytes, &signature);
        }
        signature
    }

    #[test]
    fn test_happy_path_produces_verifiable_signature() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        let signature = sign_once(&cosigners, &bytes);

        let sig = frost::Signature::deserialize(&signature).unwrap();
        cosigners[0].verifying_key().verify(&bytes, &sig).unwrap();
        assert_eq!(cosigners[0].session_count(), 0);
    }

    #[test]
    fn test_idempotent_retry_returns_cached_signature() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        let signature = sign_once(&cosigners, &bytes);

        match cosigners[0].start_session(&bytes, &QUORUM) {
            Err(CosignError::SignedBefore { signature: cached, .. }) => {
                assert_eq!(cached, signature.to_vec());
            }
            other => panic!("expected SignedBefore, got {other:?}"),
        }
        // No session was opened by the retry.
        assert_eq!(cosigners[0].session_count(), 0);
    }

    #[test]
    fn test_timestamp_only_retry_resigns_at_same_hrs() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        let first = sign_once(&cosigners, &bytes);

        let later = bytes_at(10, 0, Step::Prevote, 2_000, b"block");
        let second = sign_once(&cosigners, &later);
        assert_ne!(first, second);

        let sig = frost::Signature::deserialize(&second).unwrap();
        cosigners[0].verifying_key().verify(&later, &sig).unwrap();
    }

    #[test]
    fn test_regression_is_rejected() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        sign_once(&cosigners, &bytes);

        let earlier = bytes_at(9, 0, Step::Prevote, 1_000, b"block");
        assert!(matches!(
            cosigners[0].start_session(&earlier, &QUORUM),
            Err(CosignError::WatermarkRegressed { .. })
        ));
    }

    #[test]
    fn test_conflicting_payload_at_same_hrs_is_rejected() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        sign_once(&cosigners, &bytes);

        let conflicting = bytes_at(10, 0, Step::Prevote, 1_000, b"other block");
        assert!(matches!(
            cosigners[0].start_session(&conflicting, &QUORUM),
            Err(CosignError::MismatchedData)
        ));
    }

    #[test]
    fn test_second_start_at_live_session_is_rejected() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        cosigners[0].start_session(&bytes, &QUORUM).unwrap();
        assert!(matches!(
            cosigners[0].start_session(&bytes, &QUORUM),
            Err(CosignError::AlreadyInProgress(_))
        ));
    }

    #[test]
    fn test_end_session_requires_exact_payload() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        let mut msg1 = Vec::new();
        for cosigner in &cosigners {
            msg1.extend(cosigner.start_session(&bytes, &QUORUM).unwrap());
        }

        // Same HRS, different timestamp: passes the watermark guard
        // but not the session payload check.
        let shifted = bytes_at(10, 0, Step::Prevote, 2_000, b"block");
        assert!(matches!(
            cosigners[0].end_session(&shifted, &msg1),
            Err(CosignError::WrongSigningPayload)
        ));
    }

    #[test]
    fn test_end_session_without_session() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        assert!(matches!(
            cosigners[0].end_session(&bytes, &[]),
            Err(CosignError::InvalidSession(_))
        ));
    }

    #[test]
    fn test_wrong_chain_is_rejected() {
        let (cosigners, _dir) = cosigners();
        let bytes = encode("other-chain", Step::Prevote, 10, 0, 1_000, b"block");
        assert!(matches!(
            cosigners[0].start_session(&bytes, &QUORUM),
            Err(CosignError::WrongChain { .. })
        ));
    }

    #[test]
    fn test_final_sign_garbage_collects_lower_sessions() {
        let (cosigners, _dir) = cosigners();
        let prevote = bytes_at(20, 0, Step::Prevote, 1_000, b"block");
        let precommit = bytes_at(20, 0, Step::Precommit, 1_000, b"block");

        let mut msg1 = Vec::new();
        for cosigner in &cosigners {
            cosigner.start_session(&prevote, &QUORUM).unwrap();
            msg1.extend(cosigner.start_session(&precommit, &QUORUM).unwrap());
        }
        assert_eq!(cosigners[0].session_count(), 2);

        let mut msg2 = Vec::new();
        for cosigner in &cosigners {
            msg2.extend(cosigner.end_session(&precommit, &msg1).unwrap());
        }
        let key = HrsKey::new(20, 0, Step::Precommit);
        cosigners[0].final_sign(key, &msg2).unwrap();

        // The finalized session and the stale prevote session are gone.
        assert_eq!(cosigners[0].session_count(), 0);
    }

    #[test]
    fn test_set_signature_propagates_watermark() {
        let (cosigners, _dir) = cosigners();
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");
        let key = sign_bytes::parse(&bytes).unwrap().key;

        let mut msg1 = Vec::new();
        for cosigner in &cosigners {
            msg1.extend(cosigner.start_session(&bytes, &QUORUM).unwrap());
        }
        let mut msg2 = Vec::new();
        for cosigner in &cosigners {
            msg2.extend(cosigner.end_session(&bytes, &msg1).unwrap());
        }
        let signature = cosigners[0].final_sign(key, &msg2).unwrap();

        // Bad length and forged signatures are rejected before the
        // watermark moves.
        assert!(matches!(
            cosigners[1].set_signature(&bytes, &signature[..32]),
            Err(CosignError::BadSignatureLength(32))
        ));
        let mut forged = signature;
        forged[0] ^= 1;
        assert!(matches!(
            cosigners[1].set_signature(&bytes, &forged),
            Err(CosignError::InvalidSignature)
        ));

        cosigners[1].set_signature(&bytes, &signature).unwrap();
        assert_eq!(cosigners[1].session_count(), 0);

        // The watermark moved: an identical request is now idempotent,
        // a second set_signature reports it was signed before.
        assert!(matches!(
            cosigners[1].start_session(&bytes, &QUORUM),
            Err(CosignError::SignedBefore { .. })
        ));
        assert!(matches!(
            cosigners[1].set_signature(&bytes, &signature),
            Err(CosignError::SignedBefore { .. })
        ));
    }

    #[test]
    fn test_watermark_survives_restart() {
        let shares = dealer_shares(3, 2);
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state1.json");
        let bytes = bytes_at(10, 0, Step::Prevote, 1_000, b"block");

        let signature = {
            let cosigners: Vec<LocalCosigner> = shares
                .iter()
                .enumerate()
                .map(|(i, share)| {
                    let id = (i + 1) as PartyId;
                    let path = if id == 1 {
                        state_path.clone()
                    } else {
                        dir.path().join(format!("state{id}.json"))
                    };
                    LocalCosigner::from_parts(
                        id,
                        CHAIN,
                        Duration::from_secs(10),
                        share.clone(),
                        SignState::load_or_create(path).unwrap(),
                    )
                })
                .collect();
            sign_once(&cosigners, &bytes)
        };

        // Rebuild cosigner 1 from its persisted state.
        let reborn = LocalCosigner::from_parts(
            1,
            CHAIN,
            Duration::from_secs(10),
            shares[0].clone(),
            SignState::load_or_create(&state_path).unwrap(),
        );
        match reborn.start_session(&bytes, &QUORUM) {
            Err(CosignError::SignedBefore { signature: cached, .. }) => {
                assert_eq!(cached, signature.to_vec());
            }
            other => panic!("expected SignedBefore after restart, got {other:?}"),
        }
        let earlier = bytes_at(9, 0, Step::Prevote, 1_000, b"block");
        assert!(matches!(
            reborn.start_session(&earlier, &QUORUM),
            Err(CosignError::WatermarkRegressed { .. })
        ));
    }
}
