//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (withdrawal key)
//!     → wallet.rs (key loading, signing)
//!     → transaction.rs (payload, gas, fees)
//!     → client.rs (RPC connection with timeouts, broadcast)
//! Node
//!     → client.rs (blocks, logs, receipts)
//!     → abi.rs (token payload and event decoding)
//! ```
//!
//! # Security Constraints
//! - The withdrawal key ONLY comes from an environment variable
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod abi;
pub mod client;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::{BlockchainClient, ChainClient};
pub use transaction::TxBuilder;
pub use types::{ChainConfig, ChainError, ChainId, Coin, Transaction, TxStatus};
pub use wallet::Wallet;
