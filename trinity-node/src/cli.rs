use clap::{Parser, Subcommand};

use trinity_crypto::address::{format_address, pubkey_to_address};
use trinity_crypto::keys::Keypair;
use trinity_types::network::NetworkId;

use crate::config::NodeConfig;
use crate::error::NodeError;

#[derive(Parser)]
#[command(
    name = "trinity",
    about = "Trinity node: 2-of-3 consensus coordinator across Ethereum, Solana and TON",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the coordinator and relayer
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "trinity.toml")]
        config: String,
        /// Start in dev mode (default config, dev parameters, SQLite storage)
        #[arg(long)]
        dev: bool,
        /// Network: "dev" (default for --dev), "testnet", "mainnet"
        #[arg(long)]
        network: Option<String>,
        /// Storage backend: "sqlite" (default), "memory"
        #[arg(long)]
        storage: Option<String>,
        /// Override data directory path
        #[arg(long)]
        data_dir: Option<String>,
    },
    /// Initialize a new node configuration
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: String,
    },
    /// Generate a new keypair
    Keygen,
    /// Print a network's protocol parameters as TOML
    Params {
        #[arg(short, long, default_value = "dev")]
        network: String,
    },
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Run {
            config,
            dev,
            network,
            storage,
            data_dir,
        } => {
            crate::banner::print_banner();

            let mut config = if dev {
                NodeConfig::default()
            } else {
                NodeConfig::load(&config)?
            };
            if let Some(net) = network {
                config.network_id = net;
            }
            if let Some(db) = storage {
                config.storage.db_type = db;
            }
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            let network_id = config.network()?;

            {
                let dim = console::Style::new().dim();
                let cyan = console::Style::new().cyan();
                println!(
                    "  {} {}",
                    dim.apply_to("Network "),
                    cyan.apply_to(network_id.display_name()),
                );
                println!(
                    "  {} {} · {}",
                    dim.apply_to("Storage "),
                    cyan.apply_to(&config.storage.db_type),
                    cyan.apply_to(&config.storage.data_dir),
                );
                println!();
            }

            let mut node = crate::node::Node::new(config).await?;
            node.run().await
        }
        Command::Init { dir } => {
            NodeConfig::init(&dir)?;
            tracing::info!("Node configuration initialized in {}", dir);
            Ok(())
        }
        Command::Keygen => {
            let keypair = Keypair::generate();
            let public_key = keypair.public_key();
            println!("Seed: {}", hex::encode(*keypair.seed()));
            println!("Public key: {}", hex::encode(public_key));
            println!("Address: {}", format_address(&pubkey_to_address(&public_key)));
            Ok(())
        }
        Command::Params { network } => {
            let network_id = NetworkId::parse(&network).ok_or_else(|| NodeError::ConfigError {
                reason: format!("unknown network '{}'", network),
            })?;
            let text = toml::to_string_pretty(&network_id.params()).map_err(|e| {
                NodeError::ConfigError {
                    reason: format!("failed to serialize parameters: {}", e),
                }
            })?;
            print!("{}", text);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides_parse() {
        let cli = Cli::parse_from(["trinity", "run", "--dev", "--storage", "memory"]);
        match cli.command {
            Command::Run { dev, storage, .. } => {
                assert!(dev);
                assert_eq!(storage.as_deref(), Some("memory"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_params_are_valid_toml() {
        let text = toml::to_string_pretty(&NetworkId::Mainnet.params()).unwrap();
        let parsed: trinity_types::network::ProtocolParams = toml::from_str(&text).unwrap();
        assert_eq!(parsed, NetworkId::Mainnet.params());
    }
}
