//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hot_wallet::blockchain::abi::Transfer;
use hot_wallet::blockchain::client::ChainClient;
use hot_wallet::blockchain::types::{
    CallRequest, ChainError, ChainResult, FeeParams, LogEvent, ReceiptInfo, SignedTransaction, Transaction,
    TxStatus,
};
use hot_wallet::blockchain::Wallet;
use hot_wallet::config::schema::{EngineConfig, StorageConfig};
use hot_wallet::engine::EngineContext;
use hot_wallet::notify::{DepositNotice, Notifier, NotifyError, WithdrawalNotice};
use hot_wallet::store::{self, KeyValueStore, MemoryStore};

pub const CHAIN_ID: u64 = 31337;

/// Anvil's first development key.
pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const FEE_CAP: u128 = 2_000_000_000;
pub const TIP: u128 = 1_000_000_000;

/// In-process chain double. Every value is settable from the test.
pub struct MockChain {
    height: AtomicU64,
    blocks: DashMap<u64, Vec<Transaction>>,
    logs: Mutex<Vec<LogEvent>>,
    receipts: DashMap<TxHash, ReceiptInfo>,
    balances: DashMap<(Address, Option<Address>), U256>,
    nonces: DashMap<Address, u64>,
    confirmed_nonces: DashMap<Address, u64>,
    broadcasts: Mutex<Vec<SignedTransaction>>,
    fail_next_broadcast: AtomicBool,
    failing_blocks: DashMap<u64, ()>,
    fail_next_logs: AtomicBool,
    receipt_calls: AtomicU64,
}

impl MockChain {
    pub fn new(height: u64) -> Arc<Self> {
        Arc::new(Self {
            height: AtomicU64::new(height),
            blocks: DashMap::new(),
            logs: Mutex::new(Vec::new()),
            receipts: DashMap::new(),
            balances: DashMap::new(),
            nonces: DashMap::new(),
            confirmed_nonces: DashMap::new(),
            broadcasts: Mutex::new(Vec::new()),
            fail_next_broadcast: AtomicBool::new(false),
            failing_blocks: DashMap::new(),
            fail_next_logs: AtomicBool::new(false),
            receipt_calls: AtomicU64::new(0),
        })
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn add_block_tx(&self, height: u64, tx: Transaction) {
        self.blocks.entry(height).or_default().push(tx);
    }

    pub fn add_log(&self, log: LogEvent) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn set_receipt(&self, hash: TxHash, block_number: u64, success: bool) {
        self.receipts.insert(
            hash,
            ReceiptInfo {
                success,
                block_number,
                block_hash: None,
            },
        );
    }

    pub fn set_balance(&self, address: Address, contract: Option<Address>, amount: U256) {
        self.balances.insert((address, contract), amount);
    }

    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.nonces.insert(address, nonce);
    }

    pub fn set_confirmed_nonce(&self, address: Address, nonce: u64) {
        self.confirmed_nonces.insert(address, nonce);
    }

    /// Make `block_transactions(height)` fail until [`MockChain::heal_block`].
    pub fn fail_block(&self, height: u64) {
        self.failing_blocks.insert(height, ());
    }

    pub fn heal_block(&self, height: u64) {
        self.failing_blocks.remove(&height);
    }

    pub fn fail_next_logs(&self) {
        self.fail_next_logs.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_broadcast(&self) {
        self.fail_next_broadcast.store(true, Ordering::SeqCst);
    }

    pub fn broadcasts(&self) -> Vec<SignedTransaction> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn receipt_calls(&self) -> u64 {
        self.receipt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> ChainResult<u64> {
        Ok(CHAIN_ID)
    }

    async fn current_height(&self) -> ChainResult<u64> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_transactions(&self, height: u64) -> ChainResult<Vec<Transaction>> {
        if self.failing_blocks.contains_key(&height) {
            return Err(ChainError::Rpc(format!("block {height} unavailable")));
        }
        Ok(self.blocks.get(&height).map(|b| b.value().clone()).unwrap_or_default())
    }

    async fn token_transfer_logs(
        &self,
        contract: Address,
        from_height: u64,
        to_height: u64,
    ) -> ChainResult<Vec<LogEvent>> {
        if self.fail_next_logs.swap(false, Ordering::SeqCst) {
            return Err(ChainError::Timeout(1));
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.address == contract && (from_height..=to_height).contains(&log.block_number))
            .cloned()
            .collect())
    }

    async fn receipt(&self, hash: TxHash) -> ChainResult<Option<ReceiptInfo>> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.receipts.get(&hash).map(|r| *r.value()))
    }

    async fn balance(&self, address: Address, contract: Option<Address>) -> ChainResult<U256> {
        Ok(self
            .balances
            .get(&(address, contract))
            .map(|b| *b.value())
            .unwrap_or(U256::ZERO))
    }

    async fn pending_nonce(&self, address: Address) -> ChainResult<u64> {
        Ok(self.nonces.get(&address).map(|n| *n.value()).unwrap_or(0))
    }

    async fn confirmed_nonce(&self, address: Address) -> ChainResult<u64> {
        Ok(self.confirmed_nonces.get(&address).map(|n| *n.value()).unwrap_or(0))
    }

    async fn suggest_fee_cap(&self) -> ChainResult<u128> {
        Ok(FEE_CAP)
    }

    async fn suggest_tip(&self) -> ChainResult<u128> {
        Ok(TIP)
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> ChainResult<u64> {
        Ok(50_000)
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> ChainResult<()> {
        if self.fail_next_broadcast.swap(false, Ordering::SeqCst) {
            return Err(ChainError::Rejected("replacement transaction underpriced".to_string()));
        }
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(())
    }
}

/// Notifier that records every delivery and can refuse the first few.
#[derive(Default)]
pub struct RecordingNotifier {
    deposits: Mutex<Vec<DepositNotice>>,
    withdrawals: Mutex<Vec<WithdrawalNotice>>,
    failures_left: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `count` deliveries with HTTP 503.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn deposits(&self) -> Vec<DepositNotice> {
        self.deposits.lock().unwrap().clone()
    }

    pub fn withdrawals(&self) -> Vec<WithdrawalNotice> {
        self.withdrawals.lock().unwrap().clone()
    }

    fn should_fail(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_deposit(&self, notice: &DepositNotice) -> Result<(), NotifyError> {
        if self.should_fail() {
            return Err(NotifyError::Status { status: 503 });
        }
        self.deposits.lock().unwrap().push(notice.clone());
        Ok(())
    }

    async fn notify_withdrawal_settled(&self, notice: &WithdrawalNotice) -> Result<(), NotifyError> {
        if self.should_fail() {
            return Err(NotifyError::Status { status: 503 });
        }
        self.withdrawals.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub ctx: EngineContext,
}

/// A context over a mock chain at `height` and an in-memory store.
pub fn harness(height: u64) -> Harness {
    let chain = MockChain::new(height);
    let notifier = RecordingNotifier::new();
    let store = Arc::new(MemoryStore::in_memory());
    let ctx = EngineContext::new(
        CHAIN_ID,
        chain.clone(),
        store.clone(),
        notifier.clone(),
        StorageConfig::default(),
    );
    Harness {
        chain,
        notifier,
        store,
        ctx,
    }
}

/// Engine settings with short timers.
pub fn engine_config(coin: &str) -> EngineConfig {
    EngineConfig {
        coin_name: coin.to_string(),
        confirmations: 1,
        block_poll_secs: 1,
        receipt_retry_secs: 1,
        collection_interval_secs: 1,
        receipt_workers: 2,
        collection_workers: 1,
        queue_capacity: 16,
        ..EngineConfig::default()
    }
}

/// Generate a custodial wallet and store its key.
pub fn custodial_wallet(store: &dyn KeyValueStore) -> Wallet {
    let wallet = Wallet::generate(CHAIN_ID);
    store
        .put(
            &store::wallet_key(&StorageConfig::default().wallet_prefix, &wallet.address()),
            &wallet.private_key_hex(),
        )
        .unwrap();
    wallet
}

/// A plain value transfer as returned by `block_transactions`.
pub fn native_tx(hash_byte: u8, block: u64, from: Address, to: Address, value: u64) -> Transaction {
    Transaction {
        hash: TxHash::repeat_byte(hash_byte),
        block_number: Some(block),
        block_hash: None,
        from,
        to,
        value: U256::from(value),
        input: Bytes::new(),
        nonce: 0,
        gas_limit: 21_000,
        fee: FeeParams::Legacy { gas_price: 1 },
        contract: None,
        coin: String::new(),
        log_index: None,
        status: TxStatus::Pending,
        has_check: false,
        dirty: true,
    }
}

/// An ERC-20 `Transfer` log.
pub fn transfer_log(
    contract: Address,
    hash_byte: u8,
    block: u64,
    from: Address,
    to: Address,
    value: u64,
) -> LogEvent {
    LogEvent {
        address: contract,
        topics: vec![Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
        data: U256::from(value).to_be_bytes::<32>().to_vec().into(),
        tx_hash: TxHash::repeat_byte(hash_byte),
        block_number: block,
        block_hash: None,
        log_index: Some(0),
    }
}

/// Poll `check` every 50ms until it holds or `limit` passes.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
