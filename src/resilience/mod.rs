//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store call fails (subscribe, catch-up replay):
//!     → backoff.rs (exponential delay with jitter)
//!     → retry until success or shutdown
//! ```
//!
//! # Design Decisions
//! - Retries never block shutdown; every sleep races the shutdown signal
//! - Jitter keeps many nodes from hammering a recovering store in lockstep

pub mod backoff;
