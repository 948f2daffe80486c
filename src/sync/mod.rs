//! Route synchronization subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigStore
//!     → reconciler.rs (bootstrap, listen, catch up, probe)
//!     → apply.rs (watermark check, decode, index + table update)
//!     → index.rs (last record per key, tombstones kept)
//!     → RoutingTable (read by the proxy)
//! ```
//!
//! # Design Decisions
//! - One task is the only writer; the proxy only reads the table
//! - A global revision watermark makes every replay idempotent
//! - Bootstrap failures are fatal; live decode failures follow `DecodePolicy`

pub mod apply;
pub mod error;
pub mod index;
pub mod reconciler;

pub use apply::{Applied, ApplyError, RouteState};
pub use error::{SyncError, SyncResult};
pub use index::{ConfigIndex, IndexEntry};
pub use reconciler::{Phase, Reconciler, ReconcilerHandle, SyncStatus};
