//! Route synchronization for a data-plane proxy.
//!
//! Keeps an in-memory routing table eventually consistent with a
//! revision-ordered configuration store while serving traffic from it.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;
pub use routing::RoutingTable;
pub use store::{ConfigStore, MemoryStore};
pub use sync::{Reconciler, ReconcilerHandle};
