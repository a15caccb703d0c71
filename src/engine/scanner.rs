//! Block scanner: walks the chain and feeds relevant transactions to the
//! receipt queue.
//!
//! # Cursor Rules
//! - `cursor == 0` jumps to the current height without scanning
//! - A pass covers `[cursor, min(cursor + batch_size, height))`
//! - The cursor only moves past a block once all of its transactions were
//!   handed to the scheduler, so a failed pass resumes where it stopped

use alloy::primitives::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::blockchain::abi;
use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{Coin, Transaction};
use crate::engine::coins::CoinRegistry;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::scheduler::Scheduler;
use crate::engine::tracker::ReceiptJob;
use crate::observability::metrics;
use crate::store::{self, KeyValueStore};

/// Summary of one scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPass {
    /// First height covered.
    pub from: u64,
    /// One past the last height covered.
    pub to: u64,
    /// Transactions handed to the receipt queue.
    pub found: usize,
}

impl ScanPass {
    /// No block was scanned; the caller should wait before the next pass.
    pub fn is_idle(&self) -> bool {
        self.from == self.to
    }
}

pub struct BlockScanner {
    coin: Coin,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn KeyValueStore>,
    wallet_prefix: String,
    coins: Arc<CoinRegistry>,
    receipts: Arc<Scheduler<ReceiptJob>>,
    cursor: u64,
    batch_size: u64,
    poll_interval: Duration,
}

impl BlockScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coin: Coin,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn KeyValueStore>,
        wallet_prefix: impl Into<String>,
        coins: Arc<CoinRegistry>,
        receipts: Arc<Scheduler<ReceiptJob>>,
        start_block: u64,
        batch_size: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            coin,
            chain,
            store,
            wallet_prefix: wallet_prefix.into(),
            coins,
            receipts,
            cursor: start_block,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Next height to scan.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn is_custodial(&self, address: &Address) -> EngineResult<bool> {
        Ok(self
            .store
            .has(&store::wallet_key(&self.wallet_prefix, address))?)
    }

    /// Whether a transaction from a block concerns a custodial address.
    ///
    /// Calls to a monitored token are judged by their decoded recipient,
    /// since the visible `to` is the contract.
    fn is_relevant(&self, tx: &Transaction) -> EngineResult<bool> {
        if self.is_custodial(&tx.from)? {
            return Ok(true);
        }
        if self.coins.contains(&tx.to) {
            return match abi::decode_transfer_payload(&tx.input) {
                Some(transfer) => self.is_custodial(&transfer.to),
                None => Ok(false),
            };
        }
        self.is_custodial(&tx.to)
    }

    /// Run one pass over the next batch of blocks.
    pub async fn scan_pass(&mut self) -> EngineResult<ScanPass> {
        let height = self.chain.current_height().await?;

        if self.cursor == 0 {
            tracing::info!(coin = %self.coin.name, height, "Scanner starting from current height");
            self.cursor = height;
            metrics::record_scan_cursor(&self.coin.name, self.cursor);
            return Ok(ScanPass {
                from: height,
                to: height,
                found: 0,
            });
        }

        let from = self.cursor;
        let to = from.saturating_add(self.batch_size).min(height);
        if to <= from {
            return Ok(ScanPass { from, to: from, found: 0 });
        }

        let found = match self.coin.contract {
            None => self.scan_blocks(to).await?,
            Some(contract) => self.scan_logs(contract, to).await?,
        };

        metrics::record_blocks_scanned(&self.coin.name, to - from);
        tracing::debug!(coin = %self.coin.name, from, to, found, "Scan pass complete");
        Ok(ScanPass { from, to, found })
    }

    async fn scan_blocks(&mut self, to: u64) -> EngineResult<usize> {
        let mut found = 0;
        while self.cursor < to {
            let height = self.cursor;
            for mut tx in self.chain.block_transactions(height).await? {
                if !self.is_relevant(&tx)? {
                    continue;
                }
                tx.coin = self.coin.name.clone();
                tracing::debug!(coin = %self.coin.name, block = height, tx_hash = %tx.hash, "Found transaction");
                self.receipts.submit(ReceiptJob::scanned(tx)).await?;
                found += 1;
            }
            self.cursor = height + 1;
            metrics::record_scan_cursor(&self.coin.name, self.cursor);
        }
        Ok(found)
    }

    async fn scan_logs(&mut self, contract: Address, to: u64) -> EngineResult<usize> {
        let logs = self
            .chain
            .token_transfer_logs(contract, self.cursor, to - 1)
            .await?;

        let mut found = 0;
        for log in &logs {
            let Some(tx) = abi::transaction_from_log(log, &self.coin) else {
                continue;
            };
            if !(self.is_custodial(&tx.to)? || self.is_custodial(&tx.from)?) {
                continue;
            }
            tracing::debug!(
                coin = %self.coin.name,
                block = log.block_number,
                tx_hash = %tx.hash,
                to = %tx.to,
                "Found token transfer"
            );
            self.receipts.submit(ReceiptJob::scanned(tx)).await?;
            found += 1;
        }

        self.cursor = to;
        metrics::record_scan_cursor(&self.coin.name, self.cursor);
        Ok(found)
    }

    /// Scan until shutdown, sleeping `poll_interval` when idle or failing.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(coin = %self.coin.name, cursor = self.cursor, "Block scanner started");

        loop {
            let idle = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.scan_pass() => match result {
                    Ok(pass) => {
                        metrics::record_rpc_health(true);
                        pass.is_idle()
                    }
                    Err(e) => {
                        if matches!(e, EngineError::Chain(_)) {
                            metrics::record_rpc_health(false);
                        }
                        tracing::warn!(coin = %self.coin.name, cursor = self.cursor, error = %e, "Scan pass failed");
                        true
                    }
                },
            };

            if idle {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        tracing::info!(coin = %self.coin.name, cursor = self.cursor, "Block scanner stopped");
    }
}
