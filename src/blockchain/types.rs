//! Chain-specific types and error definitions.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export ChainConfig from config module to avoid duplication
pub use crate::config::schema::ChainConfig;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC connection or request failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// Block not yet available from the node.
    #[error("Block {0} not found")]
    BlockNotFound(u64),

    /// Invalid private key format or derivation error.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Node refused the signed transaction.
    #[error("Broadcast rejected: {0}")]
    Rejected(String),

    /// Call payload could not be built or decoded.
    #[error("Payload error: {0}")]
    Payload(String),

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

impl ChainError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Rpc(_) | ChainError::Timeout(_) | ChainError::BlockNotFound(_)
        )
    }
}

/// Result type for blockchain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Resolution state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    /// Map a receipt success flag to a terminal status.
    pub fn from_receipt(success: bool) -> Self {
        if success {
            TxStatus::Success
        } else {
            TxStatus::Failed
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Pending => write!(f, "pending"),
            TxStatus::Success => write!(f, "success"),
            TxStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Fee parameters of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeeParams {
    /// EIP-1559 fee cap and tip.
    Dynamic { max_fee_per_gas: u128, max_priority_fee_per_gas: u128 },
    /// Pre-1559 gas price.
    Legacy { gas_price: u128 },
}

impl Default for FeeParams {
    fn default() -> Self {
        FeeParams::Legacy { gas_price: 0 }
    }
}

/// One chain transfer, either issued by this system or observed on chain.
///
/// For token movements observed through event logs, `to` and `value` are the
/// logical recipient and amount and `contract` names the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: TxHash,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub fee: FeeParams,
    /// Token contract when the value moved is a token rather than the native coin.
    pub contract: Option<Address>,
    /// Display name of the asset moved.
    pub coin: String,
    /// Position of the originating event log, for token transfers.
    pub log_index: Option<u64>,
    pub status: TxStatus,
    /// The receipt has been resolved.
    pub has_check: bool,
    /// The record changed since it was last written to the store.
    pub dirty: bool,
}

impl Transaction {
    /// Minimal record for a hash with no other known data.
    pub fn unresolved(hash: TxHash) -> Self {
        Self {
            hash,
            block_number: None,
            block_hash: None,
            from: Address::ZERO,
            to: Address::ZERO,
            value: U256::ZERO,
            input: Bytes::new(),
            nonce: 0,
            gas_limit: 0,
            fee: FeeParams::default(),
            contract: None,
            coin: String::new(),
            log_index: None,
            status: TxStatus::Pending,
            has_check: false,
            dirty: true,
        }
    }

    /// Record the resolved receipt outcome.
    pub fn resolve(&mut self, receipt: &ReceiptInfo) {
        self.status = TxStatus::from_receipt(receipt.success);
        self.block_number = Some(receipt.block_number);
        if receipt.block_hash.is_some() {
            self.block_hash = receipt.block_hash;
        }
        self.has_check = true;
        self.dirty = true;
    }
}

/// Decoded view of an `eth_getLogs` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// Receipt fields the tracker needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub success: bool,
    pub block_number: u64,
    pub block_hash: Option<B256>,
}

/// Call used for gas estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
}

/// A signed, EIP-2718 encoded transaction ready to broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub hash: TxHash,
    pub raw: Bytes,
}

/// A monitored asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub name: String,
    /// `None` for the chain's native coin.
    pub contract: Option<Address>,
    #[serde(default)]
    pub is_nft: bool,
}

impl Coin {
    pub fn native(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contract: None,
            is_nft: false,
        }
    }

    pub fn token(name: impl Into<String>, contract: Address, is_nft: bool) -> Self {
        Self {
            name: name.into(),
            contract: Some(contract),
            is_nft,
        }
    }

    pub fn is_native(&self) -> bool {
        self.contract.is_none()
    }
}
