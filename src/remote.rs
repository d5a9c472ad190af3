//! Client side of the cosigner RPC: fans rounds out to the remote
//! peers and collects a quorum of replies.
//!
//! Peers get a stable index at construction; `active` and `session`
//! are index-parallel bitsets over them. Not thread safe by itself;
//! the threshold validator holds an external serialization around
//! every call.

use crate::config::{base_url, Config};
use crate::error::CosignError;
use crate::keyshare;
use crate::session::PartyId;
use crate::types::{decode_frames, encode_frames, CosignReply, CosignRequest};
use frost_ed25519 as frost;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
struct Peer {
    id: PartyId,
    url: String,
}

/// Connections to the remote cosigners.
pub struct RemoteCosigners {
    peers: Vec<Peer>,
    active: Vec<bool>,
    session: Vec<bool>,
    local_id: PartyId,
    threshold: usize,
    timeout: Duration,
    group_key: frost::VerifyingKey,
    client: reqwest::Client,
}

impl RemoteCosigners {
    pub fn new(config: &Config, group_key: frost::VerifyingKey) -> Result<Self, CosignError> {
        let peers = config
            .cosigners
            .iter()
            .map(|peer| (peer.id, base_url(&peer.remote_address)))
            .collect();
        Self::from_peers(
            peers,
            config.cosigner_id,
            config.cosigner_threshold as usize,
            config.session_timeout(),
            group_key,
        )
    }

    /// Build from explicit peer records (id, base URL).
    pub fn from_peers(
        peers: Vec<(PartyId, String)>,
        local_id: PartyId,
        threshold: usize,
        timeout: Duration,
        group_key: frost::VerifyingKey,
    ) -> Result<Self, CosignError> {
        let peers: Vec<Peer> = peers
            .into_iter()
            .map(|(id, url)| Peer {
                id,
                url: format!("{}/v1/cosign", url.trim_end_matches('/')),
            })
            .collect();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CosignError::Transport(e.to_string()))?;
        let count = peers.len();
        Ok(Self {
            peers,
            active: vec![true; count],
            session: vec![false; count],
            local_id,
            threshold,
            timeout,
            group_key,
            client,
        })
    }

    pub fn local_id(&self) -> PartyId {
        self.local_id
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|live| **live).count()
    }

    /// Choose the quorum for the next signing session.
    ///
    /// When too few peers are believed live, every peer is returned to
    /// the active set so a recovered node gets another chance. Returns
    /// the party ids of the chosen peers followed by the local id,
    /// `threshold + 1` entries in total.
    pub fn reset_parties(&mut self) -> Vec<PartyId> {
        if self.active_count() < self.threshold {
            tracing::info!(
                active = self.active_count(),
                threshold = self.threshold,
                "too few live peers, rehydrating the active set"
            );
            self.active.iter_mut().for_each(|live| *live = true);
        }
        self.session.iter_mut().for_each(|s| *s = false);

        let mut parties = Vec::with_capacity(self.threshold + 1);
        for (idx, peer) in self.peers.iter().enumerate() {
            if parties.len() == self.threshold {
                break;
            }
            if self.active[idx] {
                self.session[idx] = true;
                parties.push(peer.id);
            }
        }
        parties.push(self.local_id);
        parties
    }

    /// Round 0 fan-out. On a `signature` reply the call fails with
    /// `SignedBefore` carrying the (verified) peer-supplied signature.
    pub async fn start_session(
        &mut self,
        sign_bytes: &[u8],
        party_ids: &[PartyId],
    ) -> Result<Vec<Vec<u8>>, CosignError> {
        let request = CosignRequest::StartSession {
            party_id: self.local_id,
            sign_bytes: hex::encode(sign_bytes),
            party_ids: hex::encode(party_ids),
        };
        self.round(sign_bytes, request).await
    }

    /// Round 1 fan-out, carrying the aggregated round-1 frames.
    pub async fn end_session(
        &mut self,
        sign_bytes: &[u8],
        party_ids: &[PartyId],
        msg1_out: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, CosignError> {
        let request = CosignRequest::EndSession {
            party_id: self.local_id,
            sign_bytes: hex::encode(sign_bytes),
            party_ids: hex::encode(party_ids),
            msg1_out: encode_frames(msg1_out),
        };
        self.round(sign_bytes, request).await
    }

    /// Propagate the final signature to every active peer,
    /// best-effort. Failures only mark the peer inactive.
    pub async fn set_signature(&mut self, sign_bytes: &[u8], signature: &[u8]) {
        let request = CosignRequest::SetSignature {
            party_id: self.local_id,
            sign_bytes: hex::encode(sign_bytes),
            sig: hex::encode(signature),
        };

        let mut replies = self.fan_out(&request, |active, _| *active);
        while let Some(joined) = replies.join_next().await {
            let Ok((idx, result)) = joined else { continue };
            match result {
                Ok(CosignReply::Ok) => {}
                Ok(reply) => {
                    tracing::debug!(peer = self.peers[idx].id, ?reply, "set_signature reply");
                }
                Err(e) => {
                    tracing::warn!(peer = self.peers[idx].id, error = %e, "set_signature failed");
                    self.active[idx] = false;
                }
            }
        }
    }

    /// Send `request` to the selected peers, one task per peer.
    fn fan_out(
        &self,
        request: &CosignRequest,
        select: impl Fn(&bool, &bool) -> bool,
    ) -> JoinSet<(usize, Result<CosignReply, reqwest::Error>)> {
        let mut replies = JoinSet::new();
        for (idx, peer) in self.peers.iter().enumerate() {
            if !select(&self.active[idx], &self.session[idx]) {
                continue;
            }
            let client = self.client.clone();
            let url = peer.url.clone();
            let request = request.clone();
            let timeout = self.timeout;
            replies.spawn(async move {
                let result = async {
                    client
                        .post(&url)
                        .json(&request)
                        .timeout(timeout)
                        .send()
                        .await?
                        .json::<CosignReply>()
                        .await
                }
                .await;
                (idx, result)
            });
        }
        replies
    }

    /// Collect one round of replies from the session peers within the
    /// session timeout.
    async fn round(
        &mut self,
        sign_bytes: &[u8],
        request: CosignRequest,
    ) -> Result<Vec<Vec<u8>>, CosignError> {
        let mut replies = self.fan_out(&request, |_, session| *session);

        let mut collected = 0usize;
        let mut frames: Vec<Vec<u8>> = Vec::new();
        let mut maybe_sig: Option<Vec<u8>> = None;

        while let Some(joined) = replies.join_next().await {
            let Ok((idx, result)) = joined else { continue };
            let peer_id = self.peers[idx].id;
            match result {
                Err(e) => {
                    tracing::warn!(peer = peer_id, error = %e, "peer round failed");
                    self.active[idx] = false;
                }
                Ok(CosignReply::Error { message }) => {
                    // The peer is alive but declined; it stays active
                    // and is not counted toward the quorum.
                    tracing::debug!(peer = peer_id, message, "peer returned error");
                }
                Ok(CosignReply::Signature { sig }) => {
                    match hex::decode(&sig) {
                        Ok(raw)
                            if raw.len() == 64
                                && keyshare::verify_raw(&self.group_key, sign_bytes, &raw) =>
                        {
                            maybe_sig = Some(raw);
                        }
                        _ => {
                            tracing::warn!(
                                peer = peer_id,
                                "peer sent an unverifiable signature, ignoring"
                            );
                        }
                    }
                }
                Ok(CosignReply::Messages { frames: reply_frames }) => {
                    match decode_frames(&reply_frames) {
                        Ok(decoded) => {
                            frames.extend(decoded);
                            collected += 1;
                        }
                        Err(e) => {
                            tracing::warn!(peer = peer_id, error = %e, "undecodable peer frames");
                            self.active[idx] = false;
                        }
                    }
                }
                Ok(CosignReply::Ok) => {
                    tracing::debug!(peer = peer_id, "unexpected ok reply in signing round");
                }
            }
        }

        if let Some(signature) = maybe_sig {
            // A peer already finished this height/round/step; its
            // verified signature is authoritative.
            return Err(CosignError::SignedBefore {
                signature,
                timestamp: None,
            });
        }
        if collected < self.threshold {
            return Err(CosignError::NotEnoughMessages {
                collected,
                required: self.threshold,
            });
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyshare::test_support::dealer_shares;

    fn remote(threshold: usize) -> RemoteCosigners {
        let share = dealer_shares(3, 2).remove(0);
        RemoteCosigners::from_peers(
            vec![
                (2, "http://127.0.0.1:1".to_string()),
                (3, "http://127.0.0.1:1".to_string()),
            ],
            1,
            threshold,
            Duration::from_millis(200),
            share.verifying_key().clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_reset_parties_returns_quorum_with_local_last() {
        let mut remote = remote(2);
        let parties = remote.reset_parties();
        assert_eq!(parties, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_dead_peers_fail_quorum_and_recover_on_reset() {
        let mut remote = remote(2);
        remote.reset_parties();

        let result = remote.start_session(b"bytes", &[2, 3, 1]).await;
        assert!(matches!(
            result,
            Err(CosignError::NotEnoughMessages { collected: 0, required: 2 })
        ));
        assert_eq!(remote.active_count(), 0);

        // The next quorum selection rehydrates every peer.
        let parties = remote.reset_parties();
        assert_eq!(parties.len(), 3);
        assert_eq!(remote.active_count(), 2);
    }
}
