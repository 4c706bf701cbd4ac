use serde::{Deserialize, Serialize};
use std::path::Path;

use trinity_crypto::keys::Keypair;
use trinity_relayer::config::RelayerConfig;
use trinity_types::ledger::LedgerId;
use trinity_types::network::{NetworkId, ProtocolParams};

use crate::error::NodeError;

pub const CONFIG_FILE: &str = "trinity.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Parameter preset: "dev", "testnet", or "mainnet".
    #[serde(default = "default_network_id")]
    pub network_id: String,
    pub storage: StorageConfig,
    pub host: HostConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    /// Replaces the preset's protocol parameters entirely when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ProtocolParams>,
}

fn default_network_id() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Relayer state backend: "memory" or "sqlite".
    pub db_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Interval between coordinator ticks.
    pub tick_interval_ms: u64,
    /// Transaction fee the host ledger charges per proof submission.
    pub submission_fee: u64,
}

/// Hex-encoded 32-byte seeds. Missing seeds get a fresh random key at
/// startup, which only makes sense for a throwaway dev node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeysConfig {
    pub controller_seed: Option<String>,
    pub ethereum_relayer_seed: Option<String>,
    pub solana_relayer_seed: Option<String>,
    pub ton_relayer_seed: Option<String>,
}

impl KeysConfig {
    pub fn relayer_seed(&self, ledger: LedgerId) -> Option<&str> {
        match ledger {
            LedgerId::Ethereum => self.ethereum_relayer_seed.as_deref(),
            LedgerId::Solana => self.solana_relayer_seed.as_deref(),
            LedgerId::Ton => self.ton_relayer_seed.as_deref(),
        }
    }
}

/// Parse a configured seed, or generate a key when none is set.
pub fn load_keypair(seed: Option<&str>, what: &str) -> Result<Keypair, NodeError> {
    match seed {
        Some(hex_seed) => Keypair::from_hex_seed(hex_seed).map_err(|e| NodeError::ConfigError {
            reason: format!("invalid {what} seed: {e}"),
        }),
        None => {
            tracing::warn!(key = what, "no seed configured, generating an ephemeral key");
            Ok(Keypair::generate())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// File the Prometheus text exposition is written to, for a node
    /// exporter textfile collector.
    pub textfile: Option<String>,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            storage: StorageConfig {
                data_dir: dirs::home_dir()
                    .map(|h| h.join(".trinity").join("data").to_string_lossy().into_owned())
                    .unwrap_or_else(|| "./trinity-data".to_string()),
                db_type: "sqlite".to_string(),
            },
            host: HostConfig {
                tick_interval_ms: 1_000,
                submission_fee: 10,
            },
            keys: KeysConfig::default(),
            relayer: RelayerConfig::default(),
            metrics: MetricsConfig {
                enabled: true,
                textfile: None,
                interval_secs: 15,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            params: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, NodeError> {
        let contents = std::fs::read_to_string(path).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to read config file '{}': {}", path, e),
        })?;
        let config: NodeConfig = toml::from_str(&contents).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to parse config file '{}': {}", path, e),
        })?;
        Ok(config)
    }

    /// Write a default configuration file into `dir`.
    pub fn init(dir: &str) -> Result<(), NodeError> {
        let dir_path = Path::new(dir);
        if !dir_path.exists() {
            std::fs::create_dir_all(dir_path)?;
        }

        let config = NodeConfig::default();
        let toml_str = toml::to_string_pretty(&config).map_err(|e| NodeError::ConfigError {
            reason: format!("failed to serialize default config: {}", e),
        })?;

        std::fs::write(dir_path.join(CONFIG_FILE), toml_str)?;
        Ok(())
    }

    pub fn network(&self) -> Result<NetworkId, NodeError> {
        NetworkId::parse(&self.network_id).ok_or_else(|| NodeError::ConfigError {
            reason: format!(
                "unknown network '{}', expected 'dev', 'testnet', or 'mainnet'",
                self.network_id
            ),
        })
    }

    /// The preset for `network_id`, or the `[params]` override, validated.
    pub fn protocol_params(&self) -> Result<ProtocolParams, NodeError> {
        let params = match &self.params {
            Some(params) => params.clone(),
            None => self.network()?.params(),
        };
        params.validate().map_err(|e| NodeError::ConfigError {
            reason: format!("invalid protocol parameters: {e}"),
        })?;
        Ok(params)
    }
}
