//! Per-asset engine: owns the scheduler pair, the pending registry and the
//! three loops, and exposes the wallet operations.

use alloy::primitives::{Address, TxHash, U256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::blockchain::client::ChainClient;
use crate::blockchain::transaction::Replacement;
use crate::blockchain::types::{Coin, Transaction, TxStatus};
use crate::blockchain::wallet::Wallet;
use crate::config::schema::{EngineConfig, StorageConfig};
use crate::engine::coins::CoinRegistry;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::issuer::{IssuedTransfer, TransferIssuer};
use crate::engine::ledger::SettlementLedger;
use crate::engine::nonce::NonceManager;
use crate::engine::orders::OrderBook;
use crate::engine::pending::PendingRegistry;
use crate::engine::scanner::BlockScanner;
use crate::engine::scheduler::Scheduler;
use crate::engine::sweeper::{CollectionSweeper, SweepJob};
use crate::engine::tracker::{ReceiptJob, ReceiptTracker};
use crate::lifecycle::Shutdown;
use crate::notify::Notifier;
use crate::resilience::backoff::RetryPolicy;
use crate::store::{self, KeyValueStore};

/// Dependencies shared by every engine on one chain.
#[derive(Clone)]
pub struct EngineContext {
    pub chain_id: u64,
    pub chain: Arc<dyn ChainClient>,
    pub store: Arc<dyn KeyValueStore>,
    pub notifier: Arc<dyn Notifier>,
    pub coins: Arc<CoinRegistry>,
    pub nonces: Arc<NonceManager>,
    pub ledger: Arc<SettlementLedger>,
    pub orders: Arc<OrderBook>,
    pub storage: StorageConfig,
}

impl EngineContext {
    pub fn new(
        chain_id: u64,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            chain_id,
            nonces: Arc::new(NonceManager::new(chain.clone())),
            ledger: Arc::new(SettlementLedger::new(store.clone(), storage.tx_prefix.clone())),
            orders: Arc::new(OrderBook::new(store.clone(), &storage)),
            coins: Arc::new(CoinRegistry::new()),
            chain,
            store,
            notifier,
            storage,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    coin: Coin,
    ctx: EngineContext,
    treasury: Option<Address>,
    pending: Arc<PendingRegistry>,
    issuer: Arc<TransferIssuer>,
    receipts: Arc<Scheduler<ReceiptJob>>,
    sweeps: Arc<Scheduler<SweepJob>>,
    tracker: Arc<ReceiptTracker>,
    sweeper: Arc<CollectionSweeper>,
    scanner: Mutex<Option<BlockScanner>>,
}

impl Engine {
    /// Build an engine and register its coin with the shared registry.
    pub fn new(config: EngineConfig, ctx: EngineContext) -> EngineResult<Self> {
        let contract = config.contract_address().map_err(EngineError::InvalidConfig)?;
        let treasury = config.treasury().map_err(EngineError::InvalidConfig)?;
        let threshold = config.threshold().map_err(EngineError::InvalidConfig)?;

        let coin = match contract {
            Some(contract) => Coin::token(config.coin_name.clone(), contract, config.is_nft),
            None => Coin::native(config.coin_name.clone()),
        };
        ctx.coins.register(coin.clone())?;

        let pending = Arc::new(PendingRegistry::new(coin.name.clone(), config.pending_capacity));
        let receipts = Scheduler::new(format!("{}-receipts", coin.name), config.queue_capacity);
        let sweeps = Scheduler::new(format!("{}-sweeps", coin.name), config.queue_capacity);

        let issuer = Arc::new(TransferIssuer::new(
            coin.clone(),
            ctx.chain_id,
            ctx.chain.clone(),
            ctx.nonces.clone(),
            pending.clone(),
            ctx.coins.clone(),
        ));

        let tracker = Arc::new(ReceiptTracker::new(
            coin.name.clone(),
            ctx.chain.clone(),
            pending.clone(),
            ctx.coins.clone(),
            ctx.ledger.clone(),
            ctx.store.clone(),
            ctx.notifier.clone(),
            ctx.orders.clone(),
            ctx.storage.clone(),
            config.confirmations,
            Duration::from_secs(config.receipt_retry_secs),
            receipts.clone(),
        ));

        let sweeper = Arc::new(CollectionSweeper::new(
            coin.clone(),
            ctx.chain.clone(),
            ctx.store.clone(),
            ctx.storage.wallet_prefix.clone(),
            issuer.clone(),
            pending.clone(),
            threshold,
            treasury,
            sweeps.clone(),
            receipts.clone(),
            RetryPolicy::from(&config.sweep_retry),
            Duration::from_secs(config.collection_interval_secs),
        ));

        let scanner = BlockScanner::new(
            coin.clone(),
            ctx.chain.clone(),
            ctx.store.clone(),
            ctx.storage.wallet_prefix.clone(),
            ctx.coins.clone(),
            receipts.clone(),
            config.start_block,
            config.batch_size,
            Duration::from_secs(config.block_poll_secs),
        );

        Ok(Self {
            config,
            coin,
            ctx,
            treasury,
            pending,
            issuer,
            receipts,
            sweeps,
            tracker,
            sweeper,
            scanner: Mutex::new(Some(scanner)),
        })
    }

    pub fn coin(&self) -> &Coin {
        &self.coin
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    pub fn sweeper(&self) -> &Arc<CollectionSweeper> {
        &self.sweeper
    }

    /// Start every loop. Fails if the chain is unreachable or the engine
    /// was already started.
    pub async fn start(&self, shutdown: &Shutdown) -> EngineResult<Vec<JoinHandle<()>>> {
        let height = self.ctx.chain.current_height().await?;

        let scanner = self
            .scanner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(EngineError::AlreadyStarted)?;

        let mut handles = Vec::new();
        handles.extend(self.receipts.run(shutdown.subscribe()));
        handles.extend(self.sweeps.run(shutdown.subscribe()));
        handles.extend(self.tracker.spawn_workers(self.config.receipt_workers, shutdown));
        handles.extend(self.sweeper.spawn(self.config.collection_workers, shutdown));
        handles.push(tokio::spawn(scanner.run(shutdown.subscribe())));

        let pending = self.pending.clone();
        let ttl = Duration::from_secs(self.config.pending_ttl_secs);
        let janitor_shutdown = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            pending.run_janitor(ttl, janitor_shutdown).await
        }));

        tracing::info!(
            coin = %self.coin.name,
            contract = ?self.coin.contract,
            height,
            tasks = handles.len(),
            "Engine started"
        );
        Ok(handles)
    }

    /// Generate and store a new custodial wallet.
    pub fn create_wallet(&self) -> EngineResult<Address> {
        let wallet = Wallet::generate(self.ctx.chain_id);
        let address = wallet.address();
        self.ctx.store.put(
            &store::wallet_key(&self.ctx.storage.wallet_prefix, &address),
            &wallet.private_key_hex(),
        )?;
        tracing::info!(address = %address, "Wallet created");
        Ok(address)
    }

    pub fn delete_wallet(&self, address: Address) -> EngineResult<()> {
        let key = store::wallet_key(&self.ctx.storage.wallet_prefix, &address);
        if !self.ctx.store.has(&key)? {
            return Err(EngineError::UnknownWallet(address));
        }
        self.ctx.store.delete(&key)?;
        tracing::info!(address = %address, "Wallet deleted");
        Ok(())
    }

    pub fn list_wallets(&self) -> EngineResult<Vec<Address>> {
        Ok(self
            .ctx
            .store
            .list_wallets(&self.ctx.storage.wallet_prefix)?
            .into_iter()
            .map(|w| w.address)
            .collect())
    }

    fn wallet_private_key(&self, address: Address) -> EngineResult<String> {
        self.ctx
            .store
            .get(&store::wallet_key(&self.ctx.storage.wallet_prefix, &address))?
            .ok_or(EngineError::UnknownWallet(address))
    }

    fn track(&self, issued: &IssuedTransfer) -> EngineResult<()> {
        self.receipts.resubmit(ReceiptJob::issued(issued.tx.clone()))?;
        Ok(())
    }

    /// Issue a transfer signed with `private_key`.
    pub async fn transfer(
        &self,
        private_key: &str,
        to: Address,
        amount: U256,
        nonce: Option<u64>,
        contract: Option<Address>,
    ) -> EngineResult<IssuedTransfer> {
        let issued = self.issuer.issue(private_key, to, amount, nonce, contract).await?;
        self.track(&issued)?;
        Ok(issued)
    }

    /// Pay out `amount` of this engine's coin from the withdrawal wallet and
    /// record the order for settlement.
    pub async fn withdraw(&self, order_id: &str, to: Address, amount: U256) -> EngineResult<TxHash> {
        let wallet = Wallet::from_env(&self.config.withdraw_key_env, self.ctx.chain_id)?;
        let issued = self
            .issuer
            .issue(&wallet.private_key_hex(), to, amount, None, self.coin.contract)
            .await?;

        self.ctx
            .orders
            .open(order_id, issued.hash, to, amount, &self.coin.name)?;
        self.track(&issued)?;

        tracing::info!(
            coin = %self.coin.name,
            order_id,
            to = %to,
            amount = %amount,
            tx_hash = %issued.hash,
            "Withdrawal broadcast"
        );
        Ok(issued.hash)
    }

    /// Sweep `address` to the treasury if its balance reaches `threshold`.
    pub async fn sweep(&self, address: Address, threshold: U256) -> EngineResult<U256> {
        let treasury = self.treasury.ok_or(EngineError::NotConfigured("treasury_address"))?;
        let private_key = self.wallet_private_key(address)?;
        let outcome = self.issuer.sweep(&private_key, address, treasury, threshold).await?;
        if let Some(issued) = &outcome.issued {
            self.track(issued)?;
        }
        Ok(outcome.amount)
    }

    /// Current status of `hash`. Never waits for confirmation.
    pub async fn transaction_status(&self, hash: TxHash) -> EngineResult<TxStatus> {
        if self.pending.contains(&hash) {
            return Ok(TxStatus::Pending);
        }
        let record: Option<Transaction> = store::get_json(
            self.ctx.store.as_ref(),
            &format!("{}{}", self.ctx.storage.tx_prefix, hash),
        )?;
        if let Some(record) = record {
            return Ok(record.status);
        }
        Ok(match self.ctx.chain.receipt(hash).await? {
            Some(receipt) => TxStatus::from_receipt(receipt.success),
            None => TxStatus::Pending,
        })
    }

    /// Balance of this engine's coin held by `address`.
    pub async fn balance(&self, address: Address) -> EngineResult<U256> {
        Ok(self.ctx.chain.balance(address, self.coin.contract).await?)
    }

    pub async fn gas_price(&self) -> EngineResult<u128> {
        Ok(self.ctx.chain.suggest_fee_cap().await?)
    }

    fn signing_key_for(&self, hash: TxHash) -> EngineResult<String> {
        let entry = self.pending.get(&hash).ok_or(EngineError::NotPending(hash))?;
        match self.wallet_private_key(entry.tx.from) {
            Ok(key) => Ok(key),
            Err(EngineError::UnknownWallet(address)) => {
                let wallet = Wallet::from_env(&self.config.withdraw_key_env, self.ctx.chain_id)?;
                if wallet.address() == address {
                    Ok(wallet.private_key_hex())
                } else {
                    Err(EngineError::UnknownWallet(address))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn replace(&self, hash: TxHash, mode: Replacement) -> EngineResult<TxHash> {
        let private_key = self.signing_key_for(hash)?;
        let issued = self.issuer.replace(&private_key, hash, mode).await?;

        // A cancel joins the order too, but settles it as failed.
        let cancel = mode == Replacement::Cancel;
        if let Some(order_id) = self.ctx.orders.link(&hash, issued.hash, cancel)? {
            tracing::info!(
                coin = %self.coin.name,
                order_id = %order_id,
                original = %hash,
                replacement = %issued.hash,
                cancel,
                "Withdrawal replaced"
            );
        }
        self.track(&issued)?;
        Ok(issued.hash)
    }

    /// Re-broadcast a pending transaction with doubled fees.
    pub async fn speed_up(&self, hash: TxHash) -> EngineResult<TxHash> {
        self.replace(hash, Replacement::SpeedUp).await
    }

    /// Replace a pending transaction with a zero-value self transfer.
    pub async fn cancel(&self, hash: TxHash) -> EngineResult<TxHash> {
        self.replace(hash, Replacement::Cancel).await
    }

    /// Sweeps that exhausted their retries.
    pub fn dead_letters(&self) -> Vec<SweepJob> {
        self.sweeper.dead_letters()
    }
}
