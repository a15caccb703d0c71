//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     trigger → every loop leaves its select → join with deadline → exit
//! ```
//!
//! # Design Decisions
//! - Every long-running task holds a receiver; none runs unsupervised
//! - Shutdown has timeout: stragglers are aborted after the deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
