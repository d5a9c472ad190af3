//! Durable double-sign watermark.
//!
//! The watermark is the only persistent state of a cosigner: the last
//! signed (height, round, step), the exact bytes that were signed and
//! the signature over them. Every signing path checks it before
//! touching the FROST engine, and it must survive a crash at any
//! point, so each advance is an atomic fsynced file rewrite.

use crate::error::CosignError;
use crate::hrs::HrsKey;
use crate::sign_bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk watermark format
#[derive(Debug, Serialize, Deserialize)]
struct SignStateFile {
    height: i64,
    round: i64,
    step: i8,
    /// Last signed bytes (hex-encoded)
    sign_bytes: String,
    /// 64-byte Ed25519 signature over them (hex-encoded)
    signature: String,
}

/// Last-signed watermark of one cosigner.
#[derive(Debug)]
pub struct SignState {
    pub height: i64,
    pub round: i64,
    pub step: i8,
    pub sign_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    path: PathBuf,
}

impl SignState {
    /// Load the watermark, or start from zero on first boot.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, CosignError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                height: 0,
                round: 0,
                step: 0,
                sign_bytes: Vec::new(),
                signature: Vec::new(),
                path,
            });
        }

        let json = std::fs::read_to_string(&path).map_err(|e| CosignError::State(e.to_string()))?;
        let file: SignStateFile =
            serde_json::from_str(&json).map_err(|e| CosignError::State(e.to_string()))?;
        let sign_bytes =
            hex::decode(&file.sign_bytes).map_err(|e| CosignError::State(e.to_string()))?;
        let signature =
            hex::decode(&file.signature).map_err(|e| CosignError::State(e.to_string()))?;

        Ok(Self {
            height: file.height,
            round: file.round,
            step: file.step,
            sign_bytes,
            signature,
            path,
        })
    }

    pub fn hrs_key(&self) -> HrsKey {
        HrsKey {
            height: self.height,
            round: self.round,
            step: self.step,
        }
    }

    /// Compare a requested HRS against the stored watermark.
    ///
    /// `Ok(true)` when equal, `Ok(false)` when the request is ahead,
    /// `WatermarkRegressed` when it is behind.
    pub fn check_hrs(&self, requested: HrsKey) -> Result<bool, CosignError> {
        let stored = self.hrs_key();
        match requested.cmp(&stored) {
            std::cmp::Ordering::Less => Err(CosignError::WatermarkRegressed { stored, requested }),
            std::cmp::Ordering::Equal => Ok(true),
            std::cmp::Ordering::Greater => Ok(false),
        }
    }

    /// Timestamp-wildcard comparison against the stored sign bytes.
    ///
    /// Returns the previously signed timestamp when the candidate only
    /// differs in the timestamp field.
    pub fn only_differ_by_timestamp(&self, candidate: &[u8]) -> Option<i64> {
        sign_bytes::only_differ_by_timestamp(&self.sign_bytes, candidate)
    }

    /// Timestamp inside the stored sign bytes, if any.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        sign_bytes::timestamp_ns(&self.sign_bytes).map(DateTime::from_timestamp_nanos)
    }

    /// Advance the watermark and persist it.
    ///
    /// Callers must only advance to a key that is greater than or
    /// equal to the stored one; when equal, only under the
    /// timestamp-only exemption.
    pub fn advance(
        &mut self,
        key: HrsKey,
        sign_bytes: &[u8],
        signature: &[u8],
    ) -> Result<(), CosignError> {
        self.height = key.height;
        self.round = key.round;
        self.step = key.step;
        self.sign_bytes = sign_bytes.to_vec();
        self.signature = signature.to_vec();
        self.save()
    }

    /// Atomic rewrite: temp file in the same directory, fsync, rename,
    /// fsync the directory. A crash leaves either the old or the new
    /// watermark on disk, never a partial file.
    fn save(&self) -> Result<(), CosignError> {
        let file = SignStateFile {
            height: self.height,
            round: self.round,
            step: self.step,
            sign_bytes: hex::encode(&self.sign_bytes),
            signature: hex::encode(&self.signature),
        };
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| CosignError::State(e.to_string()))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let write = || -> std::io::Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(json.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&self.path).map_err(|e| e.error)?;
            std::fs::File::open(dir)?.sync_all()?;
            Ok(())
        };
        write().map_err(|e| CosignError::State(e.to_string()))
    }
}
