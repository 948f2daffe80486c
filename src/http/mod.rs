//! HTTP proxy front end.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id and trace layers)
//!     → RoutingTable::lookup(path)   miss → 404 "no route"
//!     → forward to upstream + path via hyper-util client
//!     → response.rs (strip hop-by-hop headers, map failures to 502/504)
//!     → Send to client
//! ```
//!
//! The front end only ever reads the routing table.

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use response::ProxyError;
pub use server::ProxyServer;
