//! Withdrawal orders and the transactions that may settle them.
//!
//! A withdrawal starts with one hash. Speed-ups and cancels add siblings that
//! share its nonce, so exactly one member of the family can ever mine. Each
//! hash is indexed to the order id; the order record lists the family and
//! which members are cancels. Whichever member settles closes the order and
//! removes every sibling's index entry.

use alloy::primitives::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::config::schema::StorageConfig;
use crate::store::{self, KeyValueStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalOrder {
    pub order_id: String,
    /// Intended payout recipient.
    pub to: Address,
    pub amount: U256,
    pub coin: String,
    /// Every hash broadcast for the order, original first.
    pub hashes: Vec<TxHash>,
    /// Members that pay nothing out.
    #[serde(default)]
    pub cancels: Vec<TxHash>,
}

impl WithdrawalOrder {
    pub fn is_cancel(&self, hash: &TxHash) -> bool {
        self.cancels.contains(hash)
    }

    /// Family members other than `hash`.
    pub fn siblings<'a>(&'a self, hash: &'a TxHash) -> impl Iterator<Item = &'a TxHash> + 'a {
        self.hashes.iter().filter(move |h| *h != hash)
    }
}

pub struct OrderBook {
    store: Arc<dyn KeyValueStore>,
    hash_prefix: String,
    order_prefix: String,
    // Serializes read-modify-write of order records.
    write: Mutex<()>,
}

impl OrderBook {
    pub fn new(store: Arc<dyn KeyValueStore>, storage: &StorageConfig) -> Self {
        Self {
            store,
            hash_prefix: storage.hash_prefix.clone(),
            order_prefix: storage.order_prefix.clone(),
            write: Mutex::new(()),
        }
    }

    fn index_key(&self, hash: &TxHash) -> String {
        format!("{}{}", self.hash_prefix, hash)
    }

    fn order_key(&self, order_id: &str) -> String {
        format!("{}{}", self.order_prefix, order_id)
    }

    /// Record a freshly broadcast withdrawal.
    pub fn open(
        &self,
        order_id: &str,
        hash: TxHash,
        to: Address,
        amount: U256,
        coin: &str,
    ) -> StoreResult<()> {
        let order = WithdrawalOrder {
            order_id: order_id.to_string(),
            to,
            amount,
            coin: coin.to_string(),
            hashes: vec![hash],
            cancels: Vec::new(),
        };
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        store::put_json(self.store.as_ref(), &self.order_key(order_id), &order)?;
        self.store.put(&self.index_key(&hash), order_id)
    }

    pub fn order_id(&self, hash: &TxHash) -> StoreResult<Option<String>> {
        self.store.get(&self.index_key(hash))
    }

    /// The order `hash` belongs to, if any.
    ///
    /// An index entry without an order record is treated as a single-hash
    /// order whose payout is read from the transaction itself.
    pub fn lookup(&self, hash: &TxHash) -> StoreResult<Option<WithdrawalOrder>> {
        let Some(order_id) = self.order_id(hash)? else {
            return Ok(None);
        };
        let order: Option<WithdrawalOrder> =
            store::get_json(self.store.as_ref(), &self.order_key(&order_id))?;
        Ok(Some(order.unwrap_or(WithdrawalOrder {
            order_id,
            to: Address::ZERO,
            amount: U256::ZERO,
            coin: String::new(),
            hashes: vec![*hash],
            cancels: Vec::new(),
        })))
    }

    /// Attach `replacement` to the order of `original`.
    ///
    /// Returns the order id, or `None` when `original` is not a withdrawal.
    pub fn link(
        &self,
        original: &TxHash,
        replacement: TxHash,
        cancel: bool,
    ) -> StoreResult<Option<String>> {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut order) = self.lookup(original)? else {
            return Ok(None);
        };
        if !order.hashes.contains(&replacement) {
            order.hashes.push(replacement);
        }
        if cancel && !order.is_cancel(&replacement) {
            order.cancels.push(replacement);
        }
        store::put_json(self.store.as_ref(), &self.order_key(&order.order_id), &order)?;
        self.store.put(&self.index_key(&replacement), &order.order_id)?;
        Ok(Some(order.order_id))
    }

    /// Forget the order and every index entry of its family.
    pub fn close(&self, order: &WithdrawalOrder) -> StoreResult<()> {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        for hash in &order.hashes {
            self.store.delete(&self.index_key(hash))?;
        }
        self.store.delete(&self.order_key(&order.order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn book() -> (Arc<MemoryStore>, OrderBook) {
        let store = Arc::new(MemoryStore::in_memory());
        let book = OrderBook::new(store.clone(), &StorageConfig::default());
        (store, book)
    }

    #[test]
    fn test_link_marks_cancels_only() {
        let (_, book) = book();
        let original = TxHash::repeat_byte(1);
        book.open("order-1", original, Address::repeat_byte(9), U256::from(5), "ETH")
            .unwrap();

        let faster = TxHash::repeat_byte(2);
        let cancel = TxHash::repeat_byte(3);
        assert_eq!(book.link(&original, faster, false).unwrap().as_deref(), Some("order-1"));
        assert_eq!(book.link(&faster, cancel, true).unwrap().as_deref(), Some("order-1"));

        let order = book.lookup(&cancel).unwrap().unwrap();
        assert_eq!(order.hashes, vec![original, faster, cancel]);
        assert!(order.is_cancel(&cancel));
        assert!(!order.is_cancel(&faster));
        assert_eq!(order.siblings(&faster).count(), 2);
    }

    #[test]
    fn test_link_ignores_plain_transfers() {
        let (_, book) = book();
        assert!(book
            .link(&TxHash::repeat_byte(1), TxHash::repeat_byte(2), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_close_removes_whole_family() {
        let (store, book) = book();
        let original = TxHash::repeat_byte(1);
        book.open("order-1", original, Address::repeat_byte(9), U256::from(5), "ETH")
            .unwrap();
        book.link(&original, TxHash::repeat_byte(2), true).unwrap();

        let order = book.lookup(&original).unwrap().unwrap();
        book.close(&order).unwrap();
        assert!(book.order_id(&original).unwrap().is_none());
        assert!(book.order_id(&TxHash::repeat_byte(2)).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_bare_index_entry_is_a_single_hash_order() {
        let (store, book) = book();
        let hash = TxHash::repeat_byte(4);
        store.put(&format!("hash-{}", hash), "order-legacy").unwrap();

        let order = book.lookup(&hash).unwrap().unwrap();
        assert_eq!(order.order_id, "order-legacy");
        assert_eq!(order.hashes, vec![hash]);
        assert!(order.cancels.is_empty());
    }
}
