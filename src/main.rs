//! Ledger node
//!
//! Command-line entry point: create a chain, inspect it, or run the miner.

use clap::{Parser, Subcommand};
use flexi_logger::Logger;
use ledger_core::config::ChainConfig;
use ledger_core::mining::{Mempool, Miner};
use ledger_core::storage::Blockchain;
use ledger_core::wallet::{address_to_pubkey_hash, KeyPair};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ledger-node", version, about = "Single-node proof-of-work ledger")]
struct Cli {
    /// Directory holding the chain database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new chain, paying the genesis reward to ADDRESS
    Create {
        #[arg(long)]
        address: String,
    },
    /// Print every block hash from the tip back to genesis
    List,
    /// Print the spendable balance of ADDRESS
    Balance {
        #[arg(long)]
        address: String,
    },
    /// Open the local chain and run until interrupted, mining if an
    /// address is given
    Start {
        /// Address receiving the block rewards
        #[arg(long)]
        miner: Option<String>,
    },
    /// Generate a fresh key pair
    NewAddress,
}

fn load_config(cli: &Cli) -> Result<ChainConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ChainConfig::load(path)?,
        None => ChainConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {}", err);
            std::process::exit(1);
        }
    };

    let _logger = Logger::try_with_env_or_str(&config.log_level)
        .and_then(|logger| logger.log_to_stderr().start())
        .map_err(|err| eprintln!("Failed to start logger: {}", err))
        .ok();

    if let Err(err) = run(cli.command, config).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: ChainConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Create { address } => {
            let chain = Blockchain::create(config, Some(address.as_str()))?;
            let genesis = chain.get_last_block()?;
            println!("Created chain at {}", chain.config().data_dir.display());
            println!("  Genesis: {}", genesis.hash);
            println!("  Reward:  {}", address);
        }
        Command::List => {
            let chain = Blockchain::open(config)?;
            for (prev_hash, hash) in chain.list_block_hashes()? {
                println!("{} <- {}", prev_hash, hash);
            }
        }
        Command::Balance { address } => {
            let chain = Blockchain::open(config)?;
            println!("Balance of {}: {}", address, chain.get_balance(&address)?);
        }
        Command::NewAddress => {
            let key = KeyPair::generate();
            println!("Address:     {}", key.address);
            println!("Private key: {}", hex::encode(key.private_key_bytes()));
        }
        Command::Start { miner: None } => {
            let chain = Blockchain::open(config)?;
            info!("Node running at height {} without mining", chain.get_best_height()?);
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
        }
        Command::Start { miner: Some(miner) } => {
            let reward_pubkey_hash = address_to_pubkey_hash(&miner)?;
            let chain = Arc::new(Blockchain::open(config)?);
            let mempool = Arc::new(Mempool::new());

            let handle = Miner::new(Arc::clone(&chain), reward_pubkey_hash, mempool).spawn()?;
            info!("Mining to {} from height {}", miner, chain.get_best_height()?);

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        info!("Shutdown signal received, stopping miner");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !handle.is_running() {
                            break;
                        }
                    }
                }
            }

            tokio::task::spawn_blocking(move || handle.stop()).await??;
            info!("Stopped at height {}", chain.get_best_height()?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_miner_address_is_optional() {
        let cli = Cli::try_parse_from(["ledger-node", "start"]).unwrap();
        assert!(matches!(cli.command, Command::Start { miner: None }));

        let cli = Cli::try_parse_from(["ledger-node", "start", "--miner", "LCabc"]).unwrap();
        assert!(matches!(cli.command, Command::Start { miner: Some(ref m) } if m == "LCabc"));
    }
}
