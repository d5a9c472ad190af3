//! Key share storage.
//!
//! The DKG ceremony leaves each cosigner with one FROST key package
//! (its secret share) and the shared public key package. Both are
//! persisted hex-serialized in a single JSON file that is read-only
//! after the ceremony.

use frost_ed25519 as frost;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Key share errors
#[derive(Debug, Error)]
pub enum KeyShareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("FROST error: {0}")]
    Frost(String),
}

/// On-disk key share format
#[derive(Debug, Serialize, Deserialize)]
struct KeyShareFile {
    /// Version for future format changes
    version: u8,
    /// Cosigner identifier
    cosigner_id: u8,
    /// Serialized FROST key package (hex-encoded)
    key_package: String,
    /// Serialized FROST public key package (hex-encoded)
    public_key_package: String,
}

/// One cosigner's share of the validator key.
#[derive(Debug, Clone)]
pub struct KeyShare {
    pub key_package: frost::keys::KeyPackage,
    pub public_key_package: frost::keys::PublicKeyPackage,
}

impl KeyShare {
    pub fn new(
        key_package: frost::keys::KeyPackage,
        public_key_package: frost::keys::PublicKeyPackage,
    ) -> Self {
        Self {
            key_package,
            public_key_package,
        }
    }

    /// Load a key share written by the keygen ceremony.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyShareError> {
        let json = std::fs::read_to_string(path)?;
        let file: KeyShareFile = serde_json::from_str(&json)?;

        let key_bytes = hex::decode(&file.key_package)?;
        let pubkey_bytes = hex::decode(&file.public_key_package)?;

        let key_package = frost::keys::KeyPackage::deserialize(&key_bytes)
            .map_err(|e| KeyShareError::Frost(e.to_string()))?;
        let public_key_package = frost::keys::PublicKeyPackage::deserialize(&pubkey_bytes)
            .map_err(|e| KeyShareError::Frost(e.to_string()))?;

        Ok(Self {
            key_package,
            public_key_package,
        })
    }

    /// Save the key share after a completed ceremony.
    pub fn save(&self, path: impl AsRef<Path>, cosigner_id: u8) -> Result<(), KeyShareError> {
        let key_bytes = self
            .key_package
            .serialize()
            .map_err(|e| KeyShareError::Frost(e.to_string()))?;
        let pubkey_bytes = self
            .public_key_package
            .serialize()
            .map_err(|e| KeyShareError::Frost(e.to_string()))?;

        let file = KeyShareFile {
            version: 1,
            cosigner_id,
            key_package: hex::encode(key_bytes),
            public_key_package: hex::encode(pubkey_bytes),
        };

        let json = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path.as_ref(), json)?;

        tracing::info!(
            cosigner_id,
            path = %path.as_ref().display(),
            "Saved key share"
        );
        Ok(())
    }

    /// Group verifying key shared by all cosigners.
    pub fn verifying_key(&self) -> &frost::VerifyingKey {
        self.public_key_package.verifying_key()
    }

    /// 32-byte Ed25519 group public key.
    pub fn group_key(&self) -> Result<[u8; 32], KeyShareError> {
        let bytes = self
            .verifying_key()
            .serialize()
            .map_err(|e| KeyShareError::Frost(e.to_string()))?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyShareError::Frost(format!("group key is {} bytes", bytes.len())))
    }
}

/// Verify a 64-byte Ed25519 signature against a group verifying key.
pub fn verify_raw(key: &frost::VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    match frost::Signature::deserialize(signature) {
        Ok(sig) => key.verify(message, &sig).is_ok(),
        Err(_) => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_share_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("share.json");

        let share = test_support::dealer_shares(3, 2).remove(0);
        share.save(&path, 1).unwrap();

        let loaded = KeyShare::load(&path).unwrap();
        assert_eq!(
            share.group_key().unwrap(),
            loaded.group_key().unwrap()
        );
        assert_eq!(
            share.key_package.verifying_share().serialize().unwrap(),
            loaded.key_package.verifying_share().serialize().unwrap()
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = KeyShare::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(KeyShareError::Io(_))));
    }
}
