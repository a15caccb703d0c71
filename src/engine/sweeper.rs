//! Collection sweeper: moves custodial balances above a threshold to the
//! treasury.
//!
//! A timer enumerates wallets and queues one [`SweepJob`] per address whose
//! balance reaches the threshold. Sweep workers issue the transfers; a
//! failed job is re-queued with exponential backoff and, when a retry limit
//! is configured, parked in a dead-letter list once it is exhausted.
//!
//! An address stays in flight from queueing until its sweep transaction
//! leaves the pending registry, so an unmined sweep is never repeated.

use alloy::primitives::{Address, TxHash, U256};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::Coin;
use crate::engine::error::EngineResult;
use crate::engine::issuer::TransferIssuer;
use crate::engine::pending::PendingLookup;
use crate::engine::scheduler::Scheduler;
use crate::engine::tracker::ReceiptJob;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::backoff::RetryPolicy;
use crate::store::KeyValueStore;

/// One pending sweep.
#[derive(Clone)]
pub struct SweepJob {
    pub address: Address,
    pub private_key: String,
    /// Balance observed when the job was scheduled.
    pub amount: U256,
    /// Failed attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl std::fmt::Debug for SweepJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepJob")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .field("amount", &self.amount)
            .field("attempts", &self.attempts)
            .field("last_error", &self.last_error)
            .finish()
    }
}

pub struct CollectionSweeper {
    coin: Coin,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn KeyValueStore>,
    wallet_prefix: String,
    issuer: Arc<TransferIssuer>,
    pending: Arc<dyn PendingLookup>,
    threshold: U256,
    treasury: Option<Address>,
    sweeps: Arc<Scheduler<SweepJob>>,
    receipts: Arc<Scheduler<ReceiptJob>>,
    retry: RetryPolicy,
    interval: Duration,
    /// Addresses with a queued or running sweep, and the hash once broadcast.
    in_flight: DashMap<Address, Option<TxHash>>,
    dead_letters: Mutex<Vec<SweepJob>>,
}

impl CollectionSweeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coin: Coin,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn KeyValueStore>,
        wallet_prefix: impl Into<String>,
        issuer: Arc<TransferIssuer>,
        pending: Arc<dyn PendingLookup>,
        threshold: U256,
        treasury: Option<Address>,
        sweeps: Arc<Scheduler<SweepJob>>,
        receipts: Arc<Scheduler<ReceiptJob>>,
        retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            coin,
            chain,
            store,
            wallet_prefix: wallet_prefix.into(),
            issuer,
            pending,
            threshold,
            treasury,
            sweeps,
            receipts,
            retry,
            interval,
            in_flight: DashMap::new(),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Collection is on when a non-zero threshold and a treasury are set.
    pub fn enabled(&self) -> bool {
        !self.threshold.is_zero() && self.treasury.is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Jobs that exhausted their retries.
    pub fn dead_letters(&self) -> Vec<SweepJob> {
        self.dead_letters
            .lock()
            .map(|jobs| jobs.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Release addresses whose sweep transaction is no longer pending.
    fn release_resolved(&self) {
        self.in_flight.retain(|address, hash| match hash {
            Some(hash) if !self.pending.is_pending(hash) => {
                tracing::debug!(coin = %self.coin.name, address = %address, tx_hash = %hash, "Sweep resolved");
                false
            }
            _ => true,
        });
    }

    /// Queue a sweep for every wallet at or above the threshold.
    ///
    /// Returns the number of jobs queued. Addresses whose previous sweep is
    /// still queued or unmined are skipped; a failed balance read skips only
    /// that address.
    pub async fn tick(&self) -> EngineResult<usize> {
        if !self.enabled() {
            return Ok(0);
        }
        self.release_resolved();

        let mut queued = 0;
        for wallet in self.store.list_wallets(&self.wallet_prefix)? {
            if self.in_flight.contains_key(&wallet.address) {
                continue;
            }
            let balance = match self.chain.balance(wallet.address, self.coin.contract).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::warn!(coin = %self.coin.name, address = %wallet.address, error = %e, "Balance read failed");
                    continue;
                }
            };
            if balance < self.threshold {
                continue;
            }

            self.in_flight.insert(wallet.address, None);
            let job = SweepJob {
                address: wallet.address,
                private_key: wallet.private_key,
                amount: balance,
                attempts: 0,
                last_error: None,
            };
            if let Err(e) = self.sweeps.submit(job).await {
                self.in_flight.remove(&wallet.address);
                return Err(e.into());
            }
            tracing::debug!(coin = %self.coin.name, address = %wallet.address, balance = %balance, "Sweep queued");
            queued += 1;
        }

        if queued > 0 {
            tracing::info!(coin = %self.coin.name, queued, "Collection tick");
        }
        Ok(queued)
    }

    /// Run one sweep job to completion or failure.
    pub async fn execute(&self, job: &SweepJob) -> EngineResult<U256> {
        let Some(treasury) = self.treasury else {
            return Ok(U256::ZERO);
        };
        let outcome = self
            .issuer
            .sweep(&job.private_key, job.address, treasury, self.threshold)
            .await?;
        if let Some(issued) = outcome.issued {
            tracing::info!(
                coin = %self.coin.name,
                address = %job.address,
                amount = %outcome.amount,
                tx_hash = %issued.hash,
                "Sweep broadcast"
            );
            self.in_flight.insert(job.address, Some(issued.hash));
            self.receipts.resubmit(ReceiptJob::issued(issued.tx))?;
        }
        Ok(outcome.amount)
    }

    /// Handle the result of one attempt: release, retry or dead-letter.
    fn finish(&self, mut job: SweepJob, result: EngineResult<U256>) {
        match result {
            Ok(_) => {
                metrics::record_sweep(&self.coin.name, "sent");
                // Nothing broadcast: free the address now.
                self.in_flight.remove_if(&job.address, |_, hash| hash.is_none());
            }
            Err(e) => {
                job.attempts += 1;
                job.last_error = Some(e.to_string());
                if self.retry.exhausted(job.attempts) {
                    metrics::record_sweep(&self.coin.name, "dead_letter");
                    tracing::error!(
                        coin = %self.coin.name,
                        address = %job.address,
                        attempts = job.attempts,
                        error = %e,
                        "Sweep abandoned"
                    );
                    self.in_flight.remove(&job.address);
                    match self.dead_letters.lock() {
                        Ok(mut jobs) => jobs.push(job),
                        Err(poisoned) => poisoned.into_inner().push(job),
                    }
                } else {
                    metrics::record_sweep(&self.coin.name, "retry");
                    let delay = self.retry.delay(job.attempts);
                    tracing::warn!(
                        coin = %self.coin.name,
                        address = %job.address,
                        attempts = job.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sweep failed, retrying"
                    );
                    self.sweeps.resubmit_after(job, delay);
                }
            }
        }
    }

    /// Start the collection timer and `workers` sweep workers.
    pub fn spawn(self: &Arc<Self>, workers: usize, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                let sweeper = self.clone();
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move { sweeper.worker_loop(id, shutdown).await })
            })
            .collect();

        let sweeper = self.clone();
        let shutdown = shutdown.subscribe();
        handles.push(tokio::spawn(async move { sweeper.timer_loop(shutdown).await }));
        handles
    }

    async fn timer_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.enabled() {
            tracing::info!(coin = %self.coin.name, "Collection disabled");
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(coin = %self.coin.name, error = %e, "Collection tick failed");
                    }
                }
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, id: usize, mut shutdown: broadcast::Receiver<()>) {
        let mut inbox = self.sweeps.work_channel();
        tracing::debug!(coin = %self.coin.name, worker = id, "Sweep worker started");

        loop {
            if self.sweeps.ready(&inbox).is_err() {
                break;
            }
            let job = tokio::select! {
                _ = shutdown.recv() => break,
                job = inbox.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let result = self.execute(&job).await;
            self.finish(job, result);
        }

        tracing::debug!(coin = %self.coin.name, worker = id, "Sweep worker stopped");
    }
}
