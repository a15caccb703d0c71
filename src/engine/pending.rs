//! Bounded registry of broadcast-but-unresolved transactions.

use alloy::primitives::TxHash;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::blockchain::types::Transaction;
use crate::engine::error::{EngineError, EngineResult};
use crate::observability::metrics;

/// A transaction awaiting confirmation.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub tx: Transaction,
    pub submitted_at: Instant,
    /// Hash of the speed-up or cancel that superseded this entry.
    pub replaced_by: Option<TxHash>,
}

/// What the receipt tracker may do with pending state.
pub trait PendingLookup: Send + Sync {
    fn is_pending(&self, hash: &TxHash) -> bool;

    /// Remove `hash`. Returns the entry only to the first caller.
    fn remove_pending(&self, hash: &TxHash) -> Option<PendingEntry>;
}

/// Concurrent map from hash to in-flight transaction, owned by one engine.
pub struct PendingRegistry {
    coin: String,
    capacity: usize,
    entries: DashMap<TxHash, PendingEntry>,
}

impl PendingRegistry {
    pub fn new(coin: impl Into<String>, capacity: usize) -> Self {
        Self {
            coin: coin.into(),
            capacity,
            entries: DashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail with `RegistryFull` when no new entry may be admitted.
    ///
    /// Called before broadcast: a transaction that reached the chain is
    /// always tracked.
    pub fn check_capacity(&self) -> EngineResult<()> {
        if self.entries.len() >= self.capacity {
            return Err(EngineError::RegistryFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn insert(&self, tx: Transaction) {
        let hash = tx.hash;
        self.entries.insert(
            hash,
            PendingEntry {
                tx,
                submitted_at: Instant::now(),
                replaced_by: None,
            },
        );
        metrics::record_pending_size(&self.coin, self.entries.len());
    }

    pub fn get(&self, hash: &TxHash) -> Option<PendingEntry> {
        self.entries.get(hash).map(|e| e.value().clone())
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn remove(&self, hash: &TxHash) -> Option<PendingEntry> {
        let removed = self.entries.remove(hash).map(|(_, entry)| entry);
        if removed.is_some() {
            metrics::record_pending_size(&self.coin, self.entries.len());
        }
        removed
    }

    /// Record that `original` was superseded by `replacement`.
    pub fn mark_replaced(&self, original: &TxHash, replacement: TxHash) -> bool {
        match self.entries.get_mut(original) {
            Some(mut entry) => {
                entry.replaced_by = Some(replacement);
                true
            }
            None => false,
        }
    }

    /// Drop entries submitted more than `max_age` ago. Returns their hashes.
    ///
    /// Only the registry slot is freed; receipt jobs for the evicted hashes
    /// keep running until they settle or are superseded.
    pub fn evict_older_than(&self, max_age: Duration) -> Vec<TxHash> {
        let now = Instant::now();
        let stale: Vec<TxHash> = self
            .entries
            .iter()
            .filter(|e| now.duration_since(e.submitted_at) > max_age)
            .map(|e| *e.key())
            .collect();

        let evicted: Vec<TxHash> = stale
            .into_iter()
            .filter(|hash| self.entries.remove(hash).is_some())
            .collect();

        if !evicted.is_empty() {
            metrics::record_pending_evicted(&self.coin, evicted.len());
            metrics::record_pending_size(&self.coin, self.entries.len());
        }
        evicted
    }

    /// Periodically evict entries older than `ttl` until shutdown.
    pub async fn run_janitor(&self, ttl: Duration, mut shutdown: broadcast::Receiver<()>) {
        let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    for hash in self.evict_older_than(ttl) {
                        tracing::warn!(coin = %self.coin, tx_hash = %hash, "Evicted stale pending transaction");
                    }
                }
            }
        }
    }
}

impl PendingLookup for PendingRegistry {
    fn is_pending(&self, hash: &TxHash) -> bool {
        self.contains(hash)
    }

    fn remove_pending(&self, hash: &TxHash) -> Option<PendingEntry> {
        self.remove(hash)
    }
}
