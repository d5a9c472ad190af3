//! TOML configuration for a cosigner node.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One upstream host validator process.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub address: String,
}

/// One peer cosigner.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: u8,
    pub remote_address: String,
}

/// Cosigner node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub key_share_file: PathBuf,
    pub state_file: PathBuf,
    pub chain_id: String,
    pub cosigner_id: u8,
    /// The t in t-of-n; a signing quorum is threshold + 1 parties.
    pub cosigner_threshold: u8,
    #[serde(default)]
    pub keygen_proxy_pub: Option<String>,
    #[serde(default)]
    pub keygen_proxy_sub: Option<String>,
    pub session_timeout_sec: u64,
    pub cosigner_listen_address: String,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeConfig>,
    #[serde(default, rename = "cosigner")]
    pub cosigners: Vec<PeerConfig>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id.is_empty() {
            return Err(ConfigError::Invalid("chain_id is required".to_string()));
        }
        if self.cosigner_id == 0 {
            return Err(ConfigError::Invalid(
                "cosigner_id must be in 1..=255".to_string(),
            ));
        }
        if self.cosigner_threshold == 0 {
            return Err(ConfigError::Invalid(
                "cosigner_threshold must be at least 1".to_string(),
            ));
        }
        if self.session_timeout_sec == 0 {
            return Err(ConfigError::Invalid(
                "session_timeout_sec must be positive".to_string(),
            ));
        }
        if (self.cosigner_threshold as usize) > self.cosigners.len() {
            return Err(ConfigError::Invalid(format!(
                "cosigner_threshold {} exceeds the {} configured peers",
                self.cosigner_threshold,
                self.cosigners.len()
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for peer in &self.cosigners {
            if peer.id == 0 {
                return Err(ConfigError::Invalid(
                    "cosigner ids must be in 1..=255".to_string(),
                ));
            }
            if peer.id == self.cosigner_id {
                return Err(ConfigError::Invalid(format!(
                    "peer id {} collides with the local cosigner_id",
                    peer.id
                )));
            }
            if !seen.insert(peer.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate cosigner id {}",
                    peer.id
                )));
            }
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Parse the listen address, accepting the `tcp://*:port` form of
    /// legacy config files alongside plain `host:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self
            .cosigner_listen_address
            .strip_prefix("tcp://")
            .unwrap_or(&self.cosigner_listen_address)
            .replace('*', "0.0.0.0");
        raw.parse().map_err(|e| {
            ConfigError::Invalid(format!(
                "cosigner_listen_address {:?}: {e}",
                self.cosigner_listen_address
            ))
        })
    }

    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_timeout_sec)
    }
}

/// Turn a configured peer/broker address into an HTTP base URL.
///
/// Legacy config files carry `tcp://host:port`; peers speak HTTP.
pub fn base_url(address: &str) -> String {
    let url = if let Some(rest) = address.strip_prefix("tcp://") {
        format!("http://{rest}")
    } else {
        address.to_string()
    };
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        key_share_file = "share.json"
        state_file = "state.json"
        chain_id = "test-chain"
        cosigner_id = 1
        cosigner_threshold = 2
        session_timeout_sec = 5
        cosigner_listen_address = "tcp://*:7101"

        [[node]]
        address = "tcp://127.0.0.1:26659"

        [[cosigner]]
        id = 2
        remote_address = "tcp://127.0.0.1:7102"

        [[cosigner]]
        id = 3
        remote_address = "http://127.0.0.1:7103"
    "#;

    #[test]
    fn test_load_sample() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cosigner_id, 1);
        assert_eq!(config.cosigners.len(), 2);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.listen_addr().unwrap().port(), 7101);
    }

    #[test]
    fn test_rejects_duplicate_peer_id() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.cosigners[1].id = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_threshold_above_peer_count() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.cosigner_threshold = 3;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_peer_id_colliding_with_local() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.cosigners[0].id = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_base_url_schemes() {
        assert_eq!(base_url("tcp://10.0.0.1:7102"), "http://10.0.0.1:7102");
        assert_eq!(base_url("http://10.0.0.1:7102/"), "http://10.0.0.1:7102");
    }
}
