//! Configuration management for Emberchain

use crate::error::{NodeError, Result};
use crate::peers::{check_peer_address, PeerAddr};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    /// Shared token for local management commands (addnode/removenode).
    /// Empty means those commands are always refused.
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChainConfig {
    /// Hex address credited by the deterministic genesis block. Every node
    /// of a network must agree on it.
    #[serde(default = "default_beneficiary")]
    pub genesis_beneficiary: String,
}

#[derive(Debug, Deserialize)]
pub struct BuilderConfig {
    #[serde(default = "default_builder_enabled")]
    pub enabled: bool,
    #[serde(default = "default_min_transactions")]
    pub min_transactions: usize,
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "default_beneficiary")]
    pub beneficiary_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            bootstrap_peers: Vec::new(),
            auth_token: String::new(),
            reply_timeout_secs: default_reply_timeout(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            genesis_beneficiary: default_beneficiary(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            enabled: default_builder_enabled(),
            min_transactions: default_min_transactions(),
            max_transactions: default_max_transactions(),
            beneficiary_address: default_beneficiary(),
        }
    }
}

impl Config {
    /// The address this node announces about itself in outgoing messages.
    pub fn own_address(&self) -> PeerAddr {
        PeerAddr::new(self.node.host.clone(), self.node.port)
    }

    pub fn bootstrap_peers(&self) -> Result<Vec<PeerAddr>> {
        self.network
            .bootstrap_peers
            .iter()
            .map(|s| s.parse())
            .collect()
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or_else(|| Path::new("config.toml"));
    let config_str = fs::read_to_string(path).unwrap_or_default();

    let config: Config = if config_str.is_empty() {
        // Sane defaults when config.toml is absent
        Config {
            node: NodeConfig {
                host: default_host(),
                port: default_port(),
            },
            network: NetworkConfig::default(),
            chain: ChainConfig::default(),
            builder: BuilderConfig::default(),
        }
    } else {
        toml::from_str(&config_str).map_err(|e| NodeError::ConfigError(e.to_string()))?
    };

    // Validate critical values
    check_peer_address(&config.own_address())?;
    config.bootstrap_peers()?;

    for (name, address) in [
        ("chain.genesis_beneficiary", &config.chain.genesis_beneficiary),
        ("builder.beneficiary_address", &config.builder.beneficiary_address),
    ] {
        crate::crypto::address_from_hex(address)
            .map_err(|e| NodeError::ConfigError(format!("{}: {}", name, e)))?;
    }

    if config.builder.min_transactions == 0
        || config.builder.max_transactions < config.builder.min_transactions
    {
        return Err(NodeError::ConfigError(
            "builder.min_transactions must be >= 1 and <= builder.max_transactions".to_string(),
        ));
    }

    Ok(config)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8333
}

fn default_reply_timeout() -> u64 {
    30
}

fn default_beneficiary() -> String {
    hex::encode([0u8; 32])
}

fn default_builder_enabled() -> bool {
    true
}

fn default_min_transactions() -> usize {
    1
}

fn default_max_transactions() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.node.port, 8333);
        assert!(config.network.bootstrap_peers.is_empty());
        assert_eq!(config.network.reply_timeout_secs, 30);
        assert!(config.builder.enabled);
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
host = "10.1.2.3"
port = 9000

[network]
bootstrap_peers = ["10.1.2.4:9000"]
auth_token = "letmein"

[builder]
enabled = false
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.own_address().to_string(), "10.1.2.3:9000");
        assert_eq!(config.bootstrap_peers().unwrap()[0].port, 9000);
        assert_eq!(config.network.auth_token, "letmein");
        assert!(!config.builder.enabled);
    }

    #[test]
    fn test_bad_bootstrap_peer_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
port = 9000

[network]
bootstrap_peers = ["10.1.2.4:80"]
"#
        )
        .unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_bad_beneficiary_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
port = 9000

[chain]
genesis_beneficiary = "nothex"
"#
        )
        .unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }
}
