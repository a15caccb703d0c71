//! Registry of monitored token contracts, shared by the engines of a chain.

use alloy::primitives::Address;
use dashmap::DashMap;

use crate::blockchain::abi::{self, TokenTransfer};
use crate::blockchain::types::{Coin, Transaction};
use crate::engine::error::{EngineError, EngineResult};
use crate::store::{self, KeyValueStore, StoreResult};

#[derive(Default)]
pub struct CoinRegistry {
    by_contract: DashMap<Address, Coin>,
}

impl CoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token. Native coins have no contract and are not stored.
    pub fn register(&self, coin: Coin) -> EngineResult<()> {
        let Some(contract) = coin.contract else {
            return Ok(());
        };
        match self.by_contract.entry(contract) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::DuplicateCoin(contract)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(coin);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, contract: &Address) -> Option<Coin> {
        self.by_contract.remove(contract).map(|(_, coin)| coin)
    }

    pub fn get(&self, contract: &Address) -> Option<Coin> {
        self.by_contract.get(contract).map(|c| c.value().clone())
    }

    pub fn contains(&self, contract: &Address) -> bool {
        self.by_contract.contains_key(contract)
    }

    pub fn all(&self) -> Vec<Coin> {
        self.by_contract.iter().map(|c| c.value().clone()).collect()
    }

    /// Logical transfer carried by `tx` when it calls a known token.
    ///
    /// A transaction observed in a block names the contract as its `to`;
    /// an issued one also carries the contract in `contract`.
    pub fn unpack_transfer_payload(&self, tx: &Transaction) -> Option<(Coin, TokenTransfer)> {
        let coin = self
            .get(&tx.to)
            .or_else(|| tx.contract.filter(|c| *c == tx.to).map(|c| Coin::token(tx.coin.clone(), c, false)))?;
        let transfer = abi::decode_transfer_payload(&tx.input)?;
        Some((coin, transfer))
    }

    /// Persist `coin` under `prefix + contract`.
    pub fn persist(store: &dyn KeyValueStore, prefix: &str, coin: &Coin) -> StoreResult<()> {
        match coin.contract {
            Some(contract) => store::put_json(store, &format!("{}{}", prefix, contract), coin),
            None => Ok(()),
        }
    }

    /// Coins persisted under `prefix`. Undecodable entries are skipped.
    pub fn load_persisted(store: &dyn KeyValueStore, prefix: &str) -> StoreResult<Vec<Coin>> {
        Ok(store
            .scan_prefix(prefix)?
            .into_iter()
            .filter_map(|(key, raw)| match serde_json::from_str::<Coin>(&raw) {
                Ok(coin) => Some(coin),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping malformed coin entry");
                    None
                }
            })
            .collect())
    }
}
