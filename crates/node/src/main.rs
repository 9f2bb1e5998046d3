//! The `axon` command-line entrypoint.

use anyhow::{Context, Result};
use axon_crypto::Keypair;
use axon_node::{FullNode, GenesisConfig, NodeConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "axon", version, about = "Axon chain node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full (or validator) node.
    Node {
        /// Path to the genesis configuration file.
        #[arg(long)]
        config: PathBuf,
        /// Directory for persistent chain data.
        #[arg(long, default_value = "./axon-data")]
        data_dir: PathBuf,
        /// Hex-encoded validator secret key; enables block production.
        #[arg(long)]
        validator: Option<String>,
        /// P2P listen port; defaults to the genesis network port.
        #[arg(long)]
        listen_port: Option<u16>,
        /// Additional bootstrap nodes (host:port), repeatable.
        #[arg(long)]
        bootstrap: Vec<String>,
    },
    /// Generate or validate genesis configurations.
    Genesis {
        #[command(subcommand)]
        action: GenesisAction,
    },
}

#[derive(Subcommand)]
enum GenesisAction {
    /// Write a single-validator development genesis and print its key.
    Generate {
        /// Chain id for the new network.
        #[arg(long, default_value_t = 1)]
        chain_id: u64,
        /// Output path for the genesis file.
        #[arg(long)]
        out: PathBuf,
    },
    /// Validate an existing genesis file.
    Validate {
        /// Path to the genesis file.
        #[arg(long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Node {
            config,
            data_dir,
            validator,
            listen_port,
            bootstrap,
        } => {
            let genesis = GenesisConfig::load(&config)
                .with_context(|| format!("loading genesis {}", config.display()))?;
            let node_config = NodeConfig {
                data_dir,
                listen_port: listen_port.unwrap_or(genesis.network.p2p_port),
                bootstrap_nodes: bootstrap,
                validator_secret: validator,
                ..NodeConfig::default()
            };
            let node = FullNode::open(node_config, genesis).context("opening node")?;
            node.start().await.context("starting node")?;
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            node.stop().await;
            Ok(())
        }
        Command::Genesis { action } => match action {
            GenesisAction::Generate { chain_id, out } => {
                let keypair = Keypair::generate();
                let genesis = GenesisConfig::dev_template(chain_id, &keypair);
                let json = serde_json::to_string_pretty(&genesis)
                    .context("encoding genesis")?;
                std::fs::write(&out, json)
                    .with_context(|| format!("writing {}", out.display()))?;
                println!("genesis written to {}", out.display());
                println!("validator address: {}", keypair.address());
                println!(
                    "validator secret:  0x{}",
                    hex::encode(keypair.secret_bytes())
                );
                Ok(())
            }
            GenesisAction::Validate { path } => {
                let genesis = GenesisConfig::load(&path)
                    .with_context(|| format!("loading genesis {}", path.display()))?;
                println!(
                    "genesis ok: chain {} ({}), {} validators, {} accounts",
                    genesis.chain_id,
                    genesis.network_name,
                    genesis.initial_validators.len(),
                    genesis.initial_accounts.len()
                );
                Ok(())
            }
        },
    }
}
