//! Control-plane API.
//!
//! # Responsibilities
//! - Accept route writes and deletes and commit them to the store
//! - Expose the reconciler's progress and the current routing table
//!
//! # Design Decisions
//! - Writes are validated and re-encoded before they reach the store, so
//!   the store never holds a payload this node would refuse to decode
//! - Bearer auth is enabled by setting a non-empty `api_key`

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use tokio::sync::watch;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::routing::RoutingTable;
use crate::store::MemoryStore;
use crate::sync::SyncStatus;

/// State shared by the control-plane handlers.
#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<MemoryStore>,
    pub table: Arc<RoutingTable>,
    pub sync: watch::Receiver<SyncStatus>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/keys/{*key}", put(put_key).get(get_key).delete(delete_key))
        .route("/admin/status", get(get_status))
        .route("/admin/sync", get(get_sync))
        .route("/admin/routes", get(get_routes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
