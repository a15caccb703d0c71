//! Key-value persistence for wallets, withdrawal orders and settled records.
//!
//! # Key Layout
//! ```text
//! wallet_prefix + address  → hex private key
//! hash_prefix   + tx hash  → withdrawal order id
//! tx_prefix     + tx hash  → settled Transaction (JSON)
//! coin_prefix   + contract → Coin (JSON)
//! order_prefix  + order id → WithdrawalOrder (JSON)
//! ```
//!
//! Addresses and hashes are rendered with their `Display` form, so keys
//! written by one engine are found by every other.

pub mod memory;

use alloy::primitives::Address;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A custodial address and its signing key.
#[derive(Clone, PartialEq, Eq)]
pub struct WalletItem {
    pub address: Address,
    pub private_key: String,
}

impl std::fmt::Debug for WalletItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletItem")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Synchronous key-value store shared by every engine.
pub trait KeyValueStore: Send + Sync {
    fn has(&self, key: &str) -> StoreResult<bool>;

    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    fn delete(&self, key: &str) -> StoreResult<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;

    /// Custodial wallets stored under `prefix`. Keys that do not end in an
    /// address are skipped.
    fn list_wallets(&self, prefix: &str) -> StoreResult<Vec<WalletItem>> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .filter_map(|(key, private_key)| match key[prefix.len()..].parse::<Address>() {
                Ok(address) => Some(WalletItem { address, private_key }),
                Err(_) => {
                    tracing::warn!(key = %key, "Skipping wallet entry with malformed address");
                    None
                }
            })
            .collect())
    }
}

/// Read and decode a JSON value.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> StoreResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub fn put_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> StoreResult<()> {
    store.put(key, &serde_json::to_string(value)?)
}

/// Key of a custodial wallet.
pub fn wallet_key(prefix: &str, address: &Address) -> String {
    format!("{}{}", prefix, address)
}
