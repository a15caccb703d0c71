//! Custodial EVM hot-wallet backend.
//!
//! Watches the chain for deposits to custodial addresses, confirms issued
//! withdrawals, and sweeps balances into a treasury address.

pub mod blockchain;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod notify;
pub mod observability;
pub mod resilience;
pub mod store;

pub use config::schema::WalletConfig;
pub use engine::{Engine, EngineHost};
pub use lifecycle::Shutdown;
