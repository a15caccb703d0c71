//! Composition root: one engine per monitored asset over shared chain
//! dependencies.

use alloy::primitives::Address;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::blockchain::client::{BlockchainClient, ChainClient};
use crate::blockchain::types::Coin;
use crate::config::schema::{EngineConfig, WalletConfig};
use crate::config::validation::validate_engine;
use crate::engine::asset_engine::{Engine, EngineContext};
use crate::engine::coins::CoinRegistry;
use crate::engine::error::{EngineError, EngineResult};
use crate::lifecycle::Shutdown;
use crate::notify::WebhookNotifier;
use crate::store::MemoryStore;

pub struct EngineHost {
    ctx: EngineContext,
    /// Settings for coins added at runtime.
    template: EngineConfig,
    shutdown: Shutdown,
    engines: DashMap<String, Arc<Engine>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EngineHost {
    pub fn new(ctx: EngineContext, template: EngineConfig, shutdown: Shutdown) -> Self {
        Self {
            ctx,
            template,
            shutdown,
            engines: DashMap::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Wire the production dependencies described by `config`.
    ///
    /// No network call is made here; reachability is checked when an
    /// engine starts.
    pub fn from_config(config: &WalletConfig, shutdown: Shutdown) -> EngineResult<Self> {
        let chain: Arc<dyn ChainClient> = Arc::new(BlockchainClient::new(config.chain.clone())?);
        let store = if config.storage.path.is_empty() {
            MemoryStore::in_memory()
        } else {
            MemoryStore::load_from_file(&config.storage.path)?
        };
        let notifier = WebhookNotifier::new(&config.notify)?;
        let ctx = EngineContext::new(
            config.chain.chain_id,
            chain,
            Arc::new(store),
            Arc::new(notifier),
            config.storage.clone(),
        );
        let template = config.engines.first().cloned().unwrap_or_default();
        Ok(Self::new(ctx, template, shutdown))
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Build and start an engine for `config`.
    pub async fn start_engine(&self, config: EngineConfig) -> EngineResult<Arc<Engine>> {
        let engine = Arc::new(Engine::new(config, self.ctx.clone())?);
        let coin = engine.coin().clone();

        match engine.start(&self.shutdown).await {
            Ok(handles) => {
                self.handles
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(handles);
                self.engines.insert(coin.name.clone(), engine.clone());
                Ok(engine)
            }
            Err(e) => {
                if let Some(contract) = coin.contract {
                    self.ctx.coins.unregister(&contract);
                }
                Err(e)
            }
        }
    }

    /// Register a token at runtime and start monitoring it.
    pub async fn add_coin(&self, name: &str, contract: Address, is_nft: bool) -> EngineResult<Arc<Engine>> {
        if self.ctx.coins.contains(&contract) {
            return Err(EngineError::DuplicateCoin(contract));
        }
        let config = self.template.for_coin(name, &contract.to_string(), is_nft);
        let mut errors = Vec::new();
        validate_engine("coin", &config, &mut errors);
        if let Some(first) = errors.first() {
            return Err(EngineError::InvalidConfig(first.to_string()));
        }

        let engine = self.start_engine(config).await?;
        CoinRegistry::persist(
            self.ctx.store.as_ref(),
            &self.ctx.storage.coin_prefix,
            &Coin::token(name, contract, is_nft),
        )?;
        tracing::info!(coin = %name, contract = %contract, is_nft, "Coin added");
        Ok(engine)
    }

    /// Start engines for coins added in earlier runs that have none yet.
    pub async fn restore_coins(&self) -> EngineResult<usize> {
        let mut restored = 0;
        for coin in CoinRegistry::load_persisted(self.ctx.store.as_ref(), &self.ctx.storage.coin_prefix)? {
            let Some(contract) = coin.contract else {
                continue;
            };
            if self.ctx.coins.contains(&contract) {
                continue;
            }
            let config = self.template.for_coin(&coin.name, &contract.to_string(), coin.is_nft);
            self.start_engine(config).await?;
            restored += 1;
        }
        Ok(restored)
    }

    pub fn engine(&self, coin_name: &str) -> Option<Arc<Engine>> {
        self.engines.get(coin_name).map(|e| e.value().clone())
    }

    pub fn engines(&self) -> Vec<Arc<Engine>> {
        self.engines.iter().map(|e| e.value().clone()).collect()
    }

    /// Hand over every task handle started so far, for joining at shutdown.
    pub fn take_handles(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
