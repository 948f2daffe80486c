//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Stored payload (base64 JSON)
//!     → codec.rs (decode + validate)
//!     → Route { uri, upstream }
//!     → table.rs (uri → route, written by the reconciler)
//!     → proxy handler lookup(path)
//! ```
//!
//! # Design Decisions
//! - Exact path match, no prefix or regex in the hot path
//! - The table is derived state; the reconciler's index is the source of truth

pub mod codec;
pub mod table;

pub use codec::{decode, encode, DecodeError, Route};
pub use table::RoutingTable;
