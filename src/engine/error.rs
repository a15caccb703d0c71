//! Engine error taxonomy.

use alloy::primitives::{Address, TxHash};
use thiserror::Error;

use crate::blockchain::types::ChainError;
use crate::notify::NotifyError;
use crate::store::StoreError;

/// The scheduler's dispatch loop has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("scheduler is closed")]
pub struct SchedulerClosed;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    SchedulerClosed(#[from] SchedulerClosed),

    /// The receipt is mined but not yet buried deep enough.
    #[error("insufficient confirmations: depth {depth}, required {required}")]
    InsufficientConfirmations { depth: u64, required: u64 },

    /// No receipt yet.
    #[error("receipt not found for {0}")]
    ReceiptNotFound(TxHash),

    #[error("pending registry full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("unknown wallet {0}")]
    UnknownWallet(Address),

    #[error("transaction {0} is not pending")]
    NotPending(TxHash),

    #[error("key does not control {0}")]
    KeyMismatch(Address),

    #[error("coin with contract {0} is already registered")]
    DuplicateCoin(Address),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("engine already started")]
    AlreadyStarted,
}

impl EngineError {
    /// Whether the failing step should be retried later rather than surfaced.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Chain(e) => e.is_transient(),
            EngineError::Notify(_)
            | EngineError::InsufficientConfirmations { .. }
            | EngineError::ReceiptNotFound(_) => true,
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_taxonomy() {
        assert!(EngineError::ReceiptNotFound(TxHash::ZERO).is_transient());
        assert!(EngineError::InsufficientConfirmations { depth: 4, required: 5 }.is_transient());
        assert!(EngineError::Chain(ChainError::Timeout(3)).is_transient());
        assert!(EngineError::Notify(NotifyError::Status { status: 502 }).is_transient());

        assert!(!EngineError::Chain(ChainError::Rejected("insufficient funds".into())).is_transient());
        assert!(!EngineError::RegistryFull { capacity: 1 }.is_transient());
        assert!(!EngineError::UnknownWallet(Address::ZERO).is_transient());
    }

    #[test]
    fn test_confirmation_error_display() {
        let err = EngineError::InsufficientConfirmations { depth: 4, required: 5 };
        assert_eq!(err.to_string(), "insufficient confirmations: depth 4, required 5");
    }
}
