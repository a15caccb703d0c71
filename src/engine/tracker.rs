//! Receipt tracker: confirmation gating and settlement.
//!
//! # Per-Job State Machine
//! ```text
//! unchecked ──receipt absent / RPC error / too shallow──▶ retry after delay
//!     │    └──issued, nonce taken by a sibling──▶ dropped
//!     │
//!     └─depth >= required─▶ resolved (has_check) ──▶ settle
//!                                                      │
//!                     notify failed ◀──────────────────┤
//!                     (retry, receipt not re-read)     └─▶ record written
//! ```
//!
//! Leaving the pending registry does not end tracking: an issued job keeps
//! being checked until it settles or its nonce is consumed by another
//! transaction from the same sender.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{ChainResult, Transaction, TxStatus};
use crate::config::schema::StorageConfig;
use crate::engine::coins::CoinRegistry;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::ledger::{SettlementKey, SettlementLedger};
use crate::engine::orders::OrderBook;
use crate::engine::pending::PendingLookup;
use crate::engine::scheduler::Scheduler;
use crate::lifecycle::Shutdown;
use crate::notify::{DepositNotice, Notifier, WithdrawalNotice};
use crate::observability::metrics;
use crate::store::{self, KeyValueStore};

/// Where a job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    /// Broadcast by this engine and registered as pending.
    Issued,
    /// Observed by the block scanner.
    Scanned,
}

/// One transaction awaiting resolution.
#[derive(Debug, Clone)]
pub struct ReceiptJob {
    pub tx: Transaction,
    pub origin: JobOrigin,
    pub attempts: u32,
}

impl ReceiptJob {
    pub fn issued(tx: Transaction) -> Self {
        Self {
            tx,
            origin: JobOrigin::Issued,
            attempts: 0,
        }
    }

    pub fn scanned(tx: Transaction) -> Self {
        Self {
            tx,
            origin: JobOrigin::Scanned,
            attempts: 0,
        }
    }
}

/// Result of processing one job.
#[derive(Debug)]
pub enum Outcome {
    /// Resolved and settled.
    Resolved(TxStatus),
    /// Try again later.
    Retry(Box<ReceiptJob>, EngineError),
    /// Already settled, or superseded by a sibling; discard.
    Dropped,
}

/// Blocks on top of the receipt's block, counting that block.
pub fn confirmation_depth(latest: u64, receipt_block: u64) -> u64 {
    if latest < receipt_block {
        0
    } else {
        latest - receipt_block + 1
    }
}

/// Counter-party view of a transaction.
struct Movement {
    asset: Option<Address>,
    to: Address,
    amount: U256,
    coin: String,
}

pub struct ReceiptTracker {
    coin_name: String,
    chain: Arc<dyn ChainClient>,
    pending: Arc<dyn PendingLookup>,
    coins: Arc<CoinRegistry>,
    ledger: Arc<SettlementLedger>,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    orders: Arc<OrderBook>,
    storage: StorageConfig,
    required_confirmations: u64,
    retry_delay: Duration,
    receipts: Arc<Scheduler<ReceiptJob>>,
}

impl ReceiptTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coin_name: impl Into<String>,
        chain: Arc<dyn ChainClient>,
        pending: Arc<dyn PendingLookup>,
        coins: Arc<CoinRegistry>,
        ledger: Arc<SettlementLedger>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        orders: Arc<OrderBook>,
        storage: StorageConfig,
        required_confirmations: u64,
        retry_delay: Duration,
        receipts: Arc<Scheduler<ReceiptJob>>,
    ) -> Self {
        Self {
            coin_name: coin_name.into(),
            chain,
            pending,
            coins,
            ledger,
            store,
            notifier,
            orders,
            storage,
            required_confirmations: required_confirmations.max(1),
            retry_delay,
            receipts,
        }
    }

    /// Process one job without rescheduling it.
    pub async fn process(&self, mut job: ReceiptJob) -> Outcome {
        let hash = job.tx.hash;

        if !job.tx.has_check {
            if job.origin == JobOrigin::Issued {
                match self.ledger.is_settled(&self.settlement_key(&job.tx)) {
                    Ok(true) => {
                        self.pending.remove_pending(&hash);
                        tracing::debug!(coin = %self.coin_name, tx_hash = %hash, "Already settled, dropping job");
                        return Outcome::Dropped;
                    }
                    Ok(false) => {}
                    Err(e) => return Outcome::Retry(Box::new(job), e.into()),
                }
            }

            let receipt = match self.chain.receipt(hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) if job.origin == JobOrigin::Issued => {
                    return match self.nonce_taken_elsewhere(&job.tx).await {
                        Ok(true) => {
                            self.pending.remove_pending(&hash);
                            tracing::info!(
                                coin = %self.coin_name,
                                tx_hash = %hash,
                                nonce = job.tx.nonce,
                                "Nonce consumed by another transaction, dropping job"
                            );
                            Outcome::Dropped
                        }
                        Ok(false) => Outcome::Retry(Box::new(job), EngineError::ReceiptNotFound(hash)),
                        Err(e) => Outcome::Retry(Box::new(job), e.into()),
                    };
                }
                Ok(None) => return Outcome::Retry(Box::new(job), EngineError::ReceiptNotFound(hash)),
                Err(e) => return Outcome::Retry(Box::new(job), e.into()),
            };
            let latest = match self.chain.current_height().await {
                Ok(height) => height,
                Err(e) => return Outcome::Retry(Box::new(job), e.into()),
            };

            let depth = confirmation_depth(latest, receipt.block_number);
            if depth < self.required_confirmations {
                return Outcome::Retry(
                    Box::new(job),
                    EngineError::InsufficientConfirmations {
                        depth,
                        required: self.required_confirmations,
                    },
                );
            }

            job.tx.resolve(&receipt);
            if self.pending.remove_pending(&hash).is_some() {
                tracing::debug!(coin = %self.coin_name, tx_hash = %hash, "Removed from pending registry");
            }
            tracing::info!(
                coin = %self.coin_name,
                tx_hash = %hash,
                block = receipt.block_number,
                depth,
                status = %job.tx.status,
                "Transaction resolved"
            );
        }

        match self.settle(&job.tx).await {
            Ok(()) => Outcome::Resolved(job.tx.status),
            Err(e) => Outcome::Retry(Box::new(job), e),
        }
    }

    /// Whether the sender's confirmed nonce moved past `tx` without it.
    async fn nonce_taken_elsewhere(&self, tx: &Transaction) -> ChainResult<bool> {
        if self.chain.confirmed_nonce(tx.from).await? <= tx.nonce {
            return Ok(false);
        }
        // It may have mined since the receipt was read.
        Ok(self.chain.receipt(tx.hash).await?.is_none())
    }

    fn settlement_key(&self, tx: &Transaction) -> SettlementKey {
        let movement = self.movement(tx);
        SettlementKey {
            hash: tx.hash,
            asset: movement.asset,
            recipient: movement.to,
        }
    }

    fn movement(&self, tx: &Transaction) -> Movement {
        // Log-derived records already carry the logical recipient.
        if tx.log_index.is_some() {
            return Movement {
                asset: tx.contract,
                to: tx.to,
                amount: tx.value,
                coin: tx.coin.clone(),
            };
        }
        if let Some((coin, transfer)) = self.coins.unpack_transfer_payload(tx) {
            return Movement {
                asset: coin.contract,
                to: transfer.to,
                amount: transfer.value,
                coin: coin.name,
            };
        }
        Movement {
            asset: None,
            to: tx.to,
            amount: tx.value,
            coin: tx.coin.clone(),
        }
    }

    /// Classify a resolved transaction and deliver its notice once.
    async fn settle(&self, tx: &Transaction) -> EngineResult<()> {
        let movement = self.movement(tx);
        let key = SettlementKey {
            hash: tx.hash,
            asset: movement.asset,
            recipient: movement.to,
        };

        let Some(claim) = self.ledger.claim(key)? else {
            tracing::debug!(coin = %self.coin_name, tx_hash = %tx.hash, "Already settled");
            return Ok(());
        };

        if let Some(order) = self.orders.lookup(&tx.hash)? {
            // A mined cancel means the payout never happened.
            let notice = if order.is_cancel(&tx.hash) {
                WithdrawalNotice {
                    hash: tx.hash,
                    status: TxStatus::Failed,
                    order_id: order.order_id.clone(),
                    to: order.to,
                    amount: order.amount,
                    coin: order.coin.clone(),
                }
            } else {
                WithdrawalNotice {
                    hash: tx.hash,
                    status: tx.status,
                    order_id: order.order_id.clone(),
                    to: movement.to,
                    amount: movement.amount,
                    coin: movement.coin.clone(),
                }
            };
            self.notifier.notify_withdrawal_settled(&notice).await?;
            self.orders.close(&order)?;
            for sibling in order.siblings(&tx.hash) {
                if self.pending.remove_pending(sibling).is_some() {
                    tracing::debug!(coin = %self.coin_name, tx_hash = %sibling, "Retired replaced sibling");
                }
            }
            tracing::info!(
                coin = %movement.coin,
                tx_hash = %tx.hash,
                order_id = %notice.order_id,
                status = %notice.status,
                "Withdrawal settled"
            );
        } else if tx.status == TxStatus::Success
            && movement.to != tx.from
            && self
                .store
                .has(&store::wallet_key(&self.storage.wallet_prefix, &movement.to))?
        {
            let notice = DepositNotice {
                hash: tx.hash,
                status: tx.status,
                to: movement.to,
                amount: movement.amount,
                coin: movement.coin.clone(),
                contract: movement.asset,
            };
            self.notifier.notify_deposit(&notice).await?;
            tracing::info!(
                coin = %movement.coin,
                tx_hash = %tx.hash,
                to = %movement.to,
                amount = %movement.amount,
                "Deposit confirmed"
            );
        }

        let mut record = tx.clone();
        record.dirty = false;
        store::put_json(
            self.store.as_ref(),
            &format!("{}{}", self.storage.tx_prefix, tx.hash),
            &record,
        )?;
        claim.commit()?;
        Ok(())
    }

    /// Start `count` workers pulling from the receipt queue.
    pub fn spawn_workers(self: &Arc<Self>, count: usize, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|id| {
                let tracker = self.clone();
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move { tracker.worker_loop(id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, id: usize, mut shutdown: broadcast::Receiver<()>) {
        let mut inbox = self.receipts.work_channel();
        tracing::debug!(coin = %self.coin_name, worker = id, "Receipt worker started");

        loop {
            if self.receipts.ready(&inbox).is_err() {
                break;
            }
            let job = tokio::select! {
                _ = shutdown.recv() => break,
                job = inbox.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            match self.process(job).await {
                Outcome::Resolved(_) => metrics::record_receipt_job(&self.coin_name, "resolved"),
                Outcome::Dropped => metrics::record_receipt_job(&self.coin_name, "dropped"),
                Outcome::Retry(mut job, reason) => {
                    metrics::record_receipt_job(&self.coin_name, "retry");
                    if reason.is_transient() {
                        tracing::debug!(coin = %self.coin_name, tx_hash = %job.tx.hash, reason = %reason, "Receipt check deferred");
                    } else {
                        tracing::warn!(coin = %self.coin_name, tx_hash = %job.tx.hash, error = %reason, "Settlement failed, retrying");
                    }
                    job.attempts += 1;
                    self.receipts.resubmit_after(*job, self.retry_delay);
                }
            }
        }

        tracing::debug!(coin = %self.coin_name, worker = id, "Receipt worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_depth() {
        // Receipt at 100 with 5 required: 104 resolves, 103 does not
        assert_eq!(confirmation_depth(104, 100), 5);
        assert_eq!(confirmation_depth(103, 100), 4);
        assert_eq!(confirmation_depth(100, 100), 1);
        // Node behind the receipt's block
        assert_eq!(confirmation_depth(99, 100), 0);
    }

    #[test]
    fn test_job_constructors() {
        let tx = Transaction::unresolved(alloy::primitives::TxHash::repeat_byte(1));
        assert_eq!(ReceiptJob::issued(tx.clone()).origin, JobOrigin::Issued);
        assert_eq!(ReceiptJob::scanned(tx).attempts, 0);
    }
}
