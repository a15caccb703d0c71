//! Resilience subsystem.
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every RPC call has a deadline (see `blockchain::client`)
//! - Failed sweeps back off exponentially with jitter instead of hot-looping

pub mod backoff;

pub use backoff::calculate_backoff;
