//! Configuration store subsystem.
//!
//! # Data Flow
//! ```text
//! write API (admin)
//!     → memory.rs (assign revision, keep tombstone, publish notification)
//!     → broadcast of JSON notifications
//!     → per-subscriber forwarder (decode, filter prefix)
//!     → Subscription (WatchEvent stream)
//!     → sync reconciler
//!
//! Recovery queries:
//!     snapshot(prefix)            → live records, revision ascending
//!     replay_since(prefix, rev)   → records after rev, tombstones included
//! ```

pub mod memory;
pub mod types;

pub use memory::MemoryStore;
pub use types::{ConfigStore, RouteConfig, StoreError, StoreResult, Subscription, WatchEvent};
