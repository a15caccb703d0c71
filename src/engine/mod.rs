//! Transaction-processing core.
//!
//! # Data Flow
//! ```text
//! Discovery:
//!     chain → scanner.rs → Scheduler<ReceiptJob> → tracker.rs
//!           → PendingRegistry / SettlementLedger → Notifier
//!
//! Action:
//!     caller → Engine → issuer.rs (nonce.rs, blockchain::transaction)
//!            → chain, hash registered in PendingRegistry
//!            → Scheduler<ReceiptJob>
//!
//! Collection:
//!     timer → sweeper.rs → Scheduler<SweepJob> → sweep workers → issuer.rs
//! ```
//!
//! # Concurrency
//! - One task per loop: scanner, each receipt worker, sweep timer, each
//!   sweep worker, each scheduler dispatcher, the pending janitor
//! - Tasks talk only through schedulers; shared maps are `DashMap`s
//! - Nonces are assigned under a per-address async mutex
//! - Every task exits on the `Shutdown` broadcast

pub mod asset_engine;
pub mod coins;
pub mod error;
pub mod host;
pub mod issuer;
pub mod ledger;
pub mod nonce;
pub mod orders;
pub mod pending;
pub mod scanner;
pub mod scheduler;
pub mod sweeper;
pub mod tracker;

pub use asset_engine::{Engine, EngineContext};
pub use error::{EngineError, EngineResult, SchedulerClosed};
pub use host::EngineHost;
pub use issuer::IssuedTransfer;
pub use scheduler::Scheduler;
