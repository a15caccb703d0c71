//! Per-address nonce assignment.
//!
//! Each sending address has its own async mutex. The lease returned by
//! [`NonceManager::reserve`] holds that mutex until it is dropped, so the
//! caller signs and broadcasts inside the critical section.

use alloy::primitives::Address;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::ChainResult;

pub struct NonceManager {
    chain: Arc<dyn ChainClient>,
    /// Last nonce broadcast per address.
    locks: DashMap<Address, Arc<Mutex<Option<u64>>>>,
}

impl NonceManager {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            locks: DashMap::new(),
        }
    }

    /// Lock `address` and pick its next nonce.
    ///
    /// An explicit nonce is used as given. Otherwise the nonce is the larger
    /// of the node's pending nonce and one past the last nonce broadcast
    /// through this manager, which covers nodes slow to count our own
    /// pending transactions.
    pub async fn reserve(&self, address: Address, explicit: Option<u64>) -> ChainResult<NonceLease> {
        let lock = self.locks.entry(address).or_default().value().clone();
        let guard = lock.lock_owned().await;

        let nonce = match explicit {
            Some(nonce) => nonce,
            None => {
                let pending = self.chain.pending_nonce(address).await?;
                match *guard {
                    Some(last) => pending.max(last + 1),
                    None => pending,
                }
            }
        };

        tracing::debug!(address = %address, nonce, "Nonce reserved");
        Ok(NonceLease { guard, nonce })
    }
}

/// A nonce plus the address lock it was chosen under.
pub struct NonceLease {
    guard: OwnedMutexGuard<Option<u64>>,
    nonce: u64,
}

impl NonceLease {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Record a successful broadcast. A lease dropped without commit leaves
    /// the counter untouched, so the nonce is reused.
    pub fn commit(mut self) {
        let nonce = self.nonce;
        let last = *self.guard;
        *self.guard = Some(last.map_or(nonce, |last| last.max(nonce)));
    }
}
