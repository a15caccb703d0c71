//! Exactly-once settlement bookkeeping.
//!
//! One transaction hash can reach the tracker twice: once from issuance and
//! once from the block scanner, or from two engines watching the same
//! block. A settlement is identified by the hash, the asset and the logical
//! recipient; the first claimant does the work, everyone else skips it.

use alloy::primitives::{Address, TxHash};
use dashmap::DashMap;
use std::sync::Arc;

use crate::store::{KeyValueStore, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SettlementKey {
    pub hash: TxHash,
    /// `None` for the native coin.
    pub asset: Option<Address>,
    pub recipient: Address,
}

impl SettlementKey {
    fn marker(&self, prefix: &str) -> String {
        let asset = self
            .asset
            .map(|a| a.to_string())
            .unwrap_or_else(|| "native".to_string());
        format!("{}{}/{}/{}", prefix, self.hash, asset, self.recipient)
    }
}

pub struct SettlementLedger {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    in_progress: DashMap<SettlementKey, ()>,
}

impl SettlementLedger {
    /// Markers are written under `prefix`.
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            in_progress: DashMap::new(),
        }
    }

    pub fn is_settled(&self, key: &SettlementKey) -> StoreResult<bool> {
        self.store.has(&key.marker(&self.prefix))
    }

    /// Claim `key` for settlement.
    ///
    /// `None` means the key is already settled or another worker holds it.
    /// Dropping the claim without [`SettlementClaim::commit`] releases it.
    pub fn claim(&self, key: SettlementKey) -> StoreResult<Option<SettlementClaim<'_>>> {
        if self.is_settled(&key)? {
            return Ok(None);
        }
        if self.in_progress.insert(key, ()).is_some() {
            return Ok(None);
        }
        // Settled between the check and the insert
        if self.is_settled(&key)? {
            self.in_progress.remove(&key);
            return Ok(None);
        }
        Ok(Some(SettlementClaim { ledger: self, key }))
    }
}

/// Exclusive right to settle one key.
pub struct SettlementClaim<'a> {
    ledger: &'a SettlementLedger,
    key: SettlementKey,
}

impl SettlementClaim<'_> {
    /// Durably mark the key settled.
    pub fn commit(self) -> StoreResult<()> {
        self.ledger
            .store
            .put(&self.key.marker(&self.ledger.prefix), "settled")
    }
}

impl Drop for SettlementClaim<'_> {
    fn drop(&mut self) {
        self.ledger.in_progress.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn key() -> SettlementKey {
        SettlementKey {
            hash: TxHash::repeat_byte(1),
            asset: None,
            recipient: Address::repeat_byte(2),
        }
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let ledger = SettlementLedger::new(Arc::new(MemoryStore::in_memory()), "tx-");
        let first = ledger.claim(key()).unwrap();
        assert!(first.is_some());
        assert!(ledger.claim(key()).unwrap().is_none());

        drop(first);
        assert!(ledger.claim(key()).unwrap().is_some());
    }

    #[test]
    fn test_commit_is_durable() {
        let store = Arc::new(MemoryStore::in_memory());
        let ledger = SettlementLedger::new(store.clone(), "tx-");
        ledger.claim(key()).unwrap().unwrap().commit().unwrap();

        assert!(ledger.is_settled(&key()).unwrap());
        assert!(ledger.claim(key()).unwrap().is_none());

        // A fresh ledger over the same store sees the marker
        let restarted = SettlementLedger::new(store, "tx-");
        assert!(restarted.claim(key()).unwrap().is_none());
    }

    #[test]
    fn test_keys_differ_by_asset_and_recipient() {
        let ledger = SettlementLedger::new(Arc::new(MemoryStore::in_memory()), "tx-");
        ledger.claim(key()).unwrap().unwrap().commit().unwrap();

        let token = SettlementKey {
            asset: Some(Address::repeat_byte(0xc)),
            ..key()
        };
        let other = SettlementKey {
            recipient: Address::repeat_byte(3),
            ..key()
        };
        assert!(ledger.claim(token).unwrap().is_some());
        assert!(ledger.claim(other).unwrap().is_some());
    }
}
