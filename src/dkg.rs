//! One-shot distributed key generation over the broker bus.
//!
//! Each party publishes its round packages to the relay and polls for
//! the other parties' messages. Frame 0 of every published message is
//! the 3-byte header `(source_id: u16 LE, round: u8)`; duplicates per
//! (source, round) are dropped. Robustness against a withholding peer
//! is out of scope: the ceremony runs once in a trusted window.

use crate::config::{base_url, Config};
use crate::keyshare::{KeyShare, KeyShareError};
use crate::session::PartyId;
use crate::types::{decode_frames, encode_frames, BusPollResponse, BusPublishRequest};
use frost_ed25519 as frost;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Delay before the first broadcast, so every party is on the bus.
const WARMUP_DELAY: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Keygen ceremony errors
#[derive(Debug, Error)]
pub enum DkgError {
    #[error("keygen configuration: {0}")]
    Config(String),
    #[error("bus transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("FROST error: {0}")]
    Frost(String),
    #[error("key share: {0}")]
    KeyShare(#[from] KeyShareError),
    #[error("malformed bus message: {0}")]
    Malformed(String),
}

fn header(source: u16, round: u8) -> Vec<u8> {
    let mut frame = vec![0u8; 3];
    frame[..2].copy_from_slice(&source.to_le_bytes());
    frame[2] = round;
    frame
}

/// Headers are fixed at exactly 3 bytes; anything else is discarded.
fn parse_header(frame: &[u8]) -> Option<(u16, u8)> {
    if frame.len() != 3 {
        return None;
    }
    Some((u16::from_le_bytes([frame[0], frame[1]]), frame[2]))
}

/// Client side of the broker: publish to one endpoint, poll the other.
struct RelayBus {
    client: reqwest::Client,
    publish_url: String,
    poll_url: String,
    cursor: u64,
}

impl RelayBus {
    fn new(publish: &str, subscribe: &str) -> Result<Self, DkgError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            publish_url: format!("{}/v1/publish", base_url(publish)),
            poll_url: format!("{}/v1/poll", base_url(subscribe)),
            cursor: 0,
        })
    }

    async fn publish(&self, frames: &[Vec<u8>]) -> Result<(), DkgError> {
        let request = BusPublishRequest {
            frames: encode_frames(frames),
        };
        self.client
            .post(&self.publish_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Vec<Vec<u8>>>, DkgError> {
        let response: BusPollResponse = self
            .client
            .get(format!("{}?cursor={}", self.poll_url, self.cursor))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.cursor = response.next_cursor;

        let mut messages = Vec::with_capacity(response.messages.len());
        for frames in &response.messages {
            match decode_frames(frames) {
                Ok(decoded) => messages.push(decoded),
                Err(e) => tracing::warn!(error = %e, "dropping undecodable bus message"),
            }
        }
        Ok(messages)
    }
}

/// Buffers bus messages by (round, source) so a fast peer's next-round
/// broadcast is not lost while this party still collects the current
/// round.
struct Collector {
    bus: RelayBus,
    local_id: u16,
    pending: BTreeMap<(u8, u16), Vec<Vec<u8>>>,
}

impl Collector {
    async fn publish(&self, round: u8, fragments: Vec<Vec<u8>>) -> Result<(), DkgError> {
        let mut frames = vec![header(self.local_id, round)];
        frames.extend(fragments);
        self.bus.publish(&frames).await
    }

    fn ready(&self, round: u8) -> usize {
        self.pending.range((round, 0)..=(round, u16::MAX)).count()
    }

    /// Collect `count` distinct other-party messages for `round`.
    async fn collect(&mut self, round: u8, count: usize) -> Result<BTreeMap<u16, Vec<Vec<u8>>>, DkgError> {
        while self.ready(round) < count {
            for message in self.bus.poll().await? {
                let Some((head, fragments)) = message.split_first() else {
                    continue;
                };
                let Some((source, message_round)) = parse_header(head) else {
                    tracing::debug!("skipping message with malformed header");
                    continue;
                };
                if source == self.local_id {
                    continue;
                }
                self.pending
                    .entry((message_round, source))
                    .or_insert_with(|| fragments.to_vec());
            }
            if self.ready(round) < count {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        let keys: Vec<(u8, u16)> = self
            .pending
            .range((round, 0)..=(round, u16::MAX))
            .map(|(key, _)| *key)
            .collect();
        let mut collected = BTreeMap::new();
        for key in keys {
            if let Some(fragments) = self.pending.remove(&key) {
                collected.insert(key.1, fragments);
            }
        }
        Ok(collected)
    }
}

fn identifier(id: u16) -> Result<frost::Identifier, DkgError> {
    frost::Identifier::try_from(id).map_err(|e| DkgError::Frost(e.to_string()))
}

/// Run the keygen ceremony and write the resulting key share.
pub async fn run_keygen(config: &Config) -> Result<(), DkgError> {
    let publish = config
        .keygen_proxy_pub
        .as_deref()
        .ok_or_else(|| DkgError::Config("keygen_proxy_pub is required".to_string()))?;
    let subscribe = config
        .keygen_proxy_sub
        .as_deref()
        .ok_or_else(|| DkgError::Config("keygen_proxy_sub is required".to_string()))?;

    let n = config.cosigners.len() + 1;
    let local_id = config.cosigner_id as u16;

    // The ceremony assigns party ids 1..=n.
    let mut ids: Vec<PartyId> = config.cosigners.iter().map(|peer| peer.id).collect();
    ids.push(config.cosigner_id);
    ids.sort_unstable();
    if ids != (1..=n as u8).collect::<Vec<_>>() {
        return Err(DkgError::Config(format!(
            "cosigner ids must cover 1..={n} for keygen, got {ids:?}"
        )));
    }

    // A signing quorum is threshold + 1 parties.
    let min_signers = config.cosigner_threshold as u16 + 1;
    let id_by_identifier: BTreeMap<frost::Identifier, u8> = (1..=n as u16)
        .map(|id| Ok((identifier(id)?, id as u8)))
        .collect::<Result<_, DkgError>>()?;

    tracing::info!(
        cosigner_id = config.cosigner_id,
        parties = n,
        min_signers,
        "starting keygen ceremony"
    );

    let mut rng = rand::thread_rng();
    let (round1_secret, round1_package) =
        frost::keys::dkg::part1(identifier(local_id)?, n as u16, min_signers, &mut rng)
            .map_err(|e| DkgError::Frost(e.to_string()))?;

    let mut collector = Collector {
        bus: RelayBus::new(publish, subscribe)?,
        local_id,
        pending: BTreeMap::new(),
    };

    tokio::time::sleep(WARMUP_DELAY).await;

    let package_bytes = round1_package
        .serialize()
        .map_err(|e| DkgError::Frost(e.to_string()))?;
    collector.publish(0, vec![package_bytes]).await?;
    tracing::info!("published round 0, collecting");

    let round0 = collector.collect(0, n - 1).await?;
    let mut round1_packages: BTreeMap<frost::Identifier, frost::keys::dkg::round1::Package> =
        BTreeMap::new();
    for (source, fragments) in &round0 {
        let payload = fragments
            .first()
            .ok_or_else(|| DkgError::Malformed(format!("empty round 0 message from {source}")))?;
        let package = frost::keys::dkg::round1::Package::deserialize(payload)
            .map_err(|e| DkgError::Frost(e.to_string()))?;
        round1_packages.insert(identifier(*source)?, package);
    }

    let (round2_secret, round2_packages) =
        frost::keys::dkg::part2(round1_secret, &round1_packages)
            .map_err(|e| DkgError::Frost(e.to_string()))?;

    // Round 1 fragments are addressed: [target_id || package].
    let mut fragments = Vec::with_capacity(round2_packages.len());
    for (target, package) in &round2_packages {
        let target_id = *id_by_identifier
            .get(target)
            .ok_or_else(|| DkgError::Malformed("unknown round 2 target".to_string()))?;
        let payload = package
            .serialize()
            .map_err(|e| DkgError::Frost(e.to_string()))?;
        let mut fragment = Vec::with_capacity(1 + payload.len());
        fragment.push(target_id);
        fragment.extend_from_slice(&payload);
        fragments.push(fragment);
    }
    collector.publish(1, fragments).await?;
    tracing::info!("published round 1, collecting");

    let round1 = collector.collect(1, n - 1).await?;
    let mut round2_for_me: BTreeMap<frost::Identifier, frost::keys::dkg::round2::Package> =
        BTreeMap::new();
    for (source, fragments) in &round1 {
        let mine = fragments
            .iter()
            .find(|fragment| fragment.first() == Some(&(local_id as u8)))
            .ok_or_else(|| {
                DkgError::Malformed(format!("no round 1 fragment addressed to us from {source}"))
            })?;
        let package = frost::keys::dkg::round2::Package::deserialize(&mine[1..])
            .map_err(|e| DkgError::Frost(e.to_string()))?;
        round2_for_me.insert(identifier(*source)?, package);
    }

    let (key_package, public_key_package) =
        frost::keys::dkg::part3(&round2_secret, &round1_packages, &round2_for_me)
            .map_err(|e| DkgError::Frost(e.to_string()))?;

    let share = KeyShare::new(key_package, public_key_package);
    let group_key = share.group_key()?;
    share.save(&config.key_share_file, config.cosigner_id)?;

    tracing::info!(
        group_key = %hex::encode(group_key),
        path = %config.key_share_file.display(),
        "keygen ceremony complete"
    );
    Ok(())
}
