//! Route lookup table shared with the proxy front end.
//!
//! # Responsibilities
//! - Map request URIs to decoded routes
//! - Serve lookups from any number of concurrent handlers
//! - Accept upserts and removals from the reconciler
//!
//! # Design Decisions
//! - `DashMap` shards keep readers from blocking each other
//! - Entries are `Arc<Route>`, so replacing one is a pointer swap and a
//!   reader never observes a half-written route
//! - No ordering between writers; the reconciler is the only writer

use std::sync::Arc;

use dashmap::DashMap;

use crate::routing::codec::Route;

/// Concurrent URI → route map read on the request path.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: DashMap<String, Arc<Route>>,
}

impl RoutingTable {
    /// Creates a new empty table.
    pub fn new() -> Self {
        Self {
            routes: DashMap::new(),
        }
    }

    /// Look up the route for an exact URI.
    pub fn lookup(&self, uri: &str) -> Option<Arc<Route>> {
        self.routes.get(uri).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert or replace the route for `uri`.
    pub fn upsert(&self, uri: impl Into<String>, route: Route) {
        self.routes.insert(uri.into(), Arc::new(route));
    }

    /// Remove the route for `uri`. No-op if absent.
    pub fn remove(&self, uri: &str) -> Option<Arc<Route>> {
        self.routes.remove(uri).map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// All routes, sorted by URI.
    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .routes
            .iter()
            .map(|entry| entry.value().as_ref().clone())
            .collect();
        routes.sort_by(|a, b| a.uri.cmp(&b.uri));
        routes
    }
}
