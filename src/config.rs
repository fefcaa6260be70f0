//! Configuration for a Caligo node.
//!
//! Loads optional `caligo.toml` from the data directory. If no config file
//! exists, defaults are used (devnet). The selected network and the prefix
//! table replace what used to be global singletons: every component receives
//! its network through its constructor.

use serde::Deserialize;
use std::path::Path;

/// The chain network an address or node belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Devnet,
}

impl Network {
    /// The three-character address prefix for this network.
    pub fn prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "PAN",
            Network::Testnet => "PTN",
            Network::Devnet => "PDN",
        }
    }

    /// Resolve a network from an address prefix.
    pub fn from_prefix(prefix: &str) -> Option<Network> {
        match prefix {
            "PAN" => Some(Network::Mainnet),
            "PTN" => Some(Network::Testnet),
            "PDN" => Some(Network::Devnet),
            _ => None,
        }
    }

    /// Network tag mixed into signing transcripts and block hashes so that
    /// transactions and blocks never replay across networks.
    pub fn chain_id(&self) -> crate::Hash {
        crate::hash_domain(b"caligo.chain_id", self.prefix().as_bytes())
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CaligoConfig {
    pub network: Network,
    pub node: NodeConfig,
    pub mempool: MempoolConfig,
}

/// Node configuration section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: "./caligo-data".into(),
        }
    }
}

/// Mempool limits.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub max_transactions: usize,
    pub max_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_transactions: crate::constants::MEMPOOL_MAX_TXS,
            max_bytes: crate::constants::MEMPOOL_MAX_BYTES,
        }
    }
}

impl CaligoConfig {
    /// Load configuration from `caligo.toml` in the given directory.
    /// Returns `Default` if the file doesn't exist.
    pub fn load(data_dir: &Path) -> Self {
        let config_path = data_dir.join("caligo.toml");
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse {}: {}, using defaults",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
