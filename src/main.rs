//! Hot-wallet service and operator CLI.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────── EngineHost ────────────────────────┐
//!                   │                                                              │
//!   chain ─────────▶│  BlockScanner ──▶ Scheduler<ReceiptJob> ──▶ ReceiptTracker ──┼──▶ webhooks
//!     ▲             │                          ▲                      │            │
//!     │             │  Engine API ──▶ TransferIssuer ──▶ PendingRegistry             │
//!     │             │        │                 │                                   │
//!     └─────────────┼────────┴─────────────────┘                                   │
//!                   │  CollectionSweeper ──▶ Scheduler<SweepJob> ──▶ sweep workers  │
//!                   │                                                              │
//!                   │  shared: ChainClient · KeyValueStore · CoinRegistry ·        │
//!                   │          NonceManager · SettlementLedger                     │
//!                   └──────────────────────────────────────────────────────────────┘
//! ```

use alloy::primitives::{Address, TxHash};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hot_wallet::blockchain::types::Coin;
use hot_wallet::blockchain::ChainClient;
use hot_wallet::config::{load_config, WalletConfig};
use hot_wallet::engine::coins::CoinRegistry;
use hot_wallet::engine::{Engine, EngineHost};
use hot_wallet::lifecycle::{shutdown, signals, Shutdown};
use hot_wallet::observability::{init_logging, metrics};
use hot_wallet::store::{KeyValueStore, MemoryStore};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "hot-wallet")]
#[command(about = "Custodial EVM hot-wallet service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "hot-wallet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scanners, receipt trackers and sweepers until SIGINT/SIGTERM
    Run,
    /// Generate and store a custodial wallet
    CreateWallet,
    /// List custodial wallet addresses
    ListWallets,
    /// Register a token contract, monitored from the next `run`
    AddCoin {
        #[arg(long)]
        name: String,
        #[arg(long)]
        contract: Address,
        #[arg(long, default_value_t = false)]
        nft: bool,
    },
    /// Show the status of a transaction
    Status {
        hash: TxHash,
        /// Engine to ask; defaults to the first configured one
        #[arg(long)]
        coin: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability.log_level)?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::CreateWallet => {
            let engine = offline_engine(&config, None)?;
            println!("{}", engine.create_wallet()?);
        }
        Commands::ListWallets => {
            let engine = offline_engine(&config, None)?;
            for address in engine.list_wallets()? {
                println!("{}", address);
            }
        }
        Commands::AddCoin { name, contract, nft } => add_coin(&config, &name, contract, nft)?,
        Commands::Status { hash, coin } => {
            let engine = offline_engine(&config, coin.as_deref())?;
            println!("{}", engine.transaction_status(hash).await?);
        }
    }

    Ok(())
}

async fn run(config: WalletConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("hot-wallet v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();
    let host = EngineHost::from_config(&config, shutdown.clone())?;

    host.context().chain.verify_chain_id(config.chain.chain_id).await?;

    for engine_config in &config.engines {
        host.start_engine(engine_config.clone()).await?;
    }
    let restored = host.restore_coins().await?;

    tracing::info!(
        engines = host.engines().len(),
        restored,
        chain_id = config.chain.chain_id,
        "All engines running"
    );

    signals::wait_for_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    if !shutdown::join_all(host.take_handles(), SHUTDOWN_DEADLINE).await {
        tracing::warn!("Some tasks did not stop in time");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

/// An engine that is built but never started, for one-shot commands.
fn offline_engine(config: &WalletConfig, coin: Option<&str>) -> Result<Arc<Engine>, Box<dyn std::error::Error>> {
    let engine_config = match coin {
        Some(name) => config
            .engines
            .iter()
            .find(|e| e.coin_name == name)
            .ok_or_else(|| format!("no engine configured for coin '{}'", name))?,
        None => config.engines.first().ok_or("no engines configured")?,
    };
    let host = EngineHost::from_config(config, Shutdown::new())?;
    Ok(Arc::new(Engine::new(engine_config.clone(), host.context().clone())?))
}

fn add_coin(config: &WalletConfig, name: &str, contract: Address, is_nft: bool) -> Result<(), Box<dyn std::error::Error>> {
    let configured = config
        .engines
        .iter()
        .any(|e| matches!(e.contract_address(), Ok(Some(c)) if c == contract));
    if configured {
        return Err(format!("contract {} is already monitored by the config file", contract).into());
    }

    if config.storage.path.is_empty() {
        return Err("add-coin needs a persistent storage.path".into());
    }
    let store = MemoryStore::load_from_file(&config.storage.path)?;
    let key = format!("{}{}", config.storage.coin_prefix, contract);
    if store.has(&key)? {
        return Err(format!("contract {} is already registered", contract).into());
    }

    CoinRegistry::persist(&store, &config.storage.coin_prefix, &Coin::token(name, contract, is_nft))?;
    println!("registered {} ({})", name, contract);
    Ok(())
}
