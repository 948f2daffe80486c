//! The convergence step.
//!
//! `RouteState::apply_change` folds one change record into the config index,
//! the routing table and the watermark. Every path through the reconciler
//! (snapshot rows, live notifications, catch-up replays) goes through it, so
//! replaying a record that was already applied is a no-op.
//!
//! # Invariants
//! - `latest_rev` never decreases
//! - a record at or below `latest_rev` changes nothing
//! - a record that fails to decode changes neither the index nor the table
//! - after every call the table equals `index.derive_routes()`

use std::sync::Arc;

use thiserror::Error;

use crate::routing::{codec, DecodeError, Route, RoutingTable};
use crate::store::RouteConfig;
use crate::sync::index::ConfigIndex;

/// What `apply_change` did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The route for `uri` was inserted or replaced.
    Upserted { uri: String },
    /// The key was retired. `uri` is `None` when the key was never seen live.
    Removed { uri: Option<String> },
    /// The record was at or below the watermark and was discarded.
    Stale,
}

impl Applied {
    pub fn label(&self) -> &'static str {
        match self {
            Applied::Upserted { .. } => "upserted",
            Applied::Removed { .. } => "removed",
            Applied::Stale => "stale",
        }
    }
}

/// A record whose payload could not be turned into a route.
#[derive(Debug, Error)]
#[error("record {key} at revision {revision} does not decode: {source}")]
pub struct ApplyError {
    pub key: String,
    pub revision: i64,
    #[source]
    pub source: DecodeError,
}

/// Index, table write side and watermark, owned by a single writer.
#[derive(Debug)]
pub struct RouteState {
    index: ConfigIndex,
    table: Arc<RoutingTable>,
    latest_rev: i64,
}

impl RouteState {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self {
            index: ConfigIndex::new(),
            table,
            latest_rev: 0,
        }
    }

    /// Highest revision fully applied.
    pub fn latest_rev(&self) -> i64 {
        self.latest_rev
    }

    pub fn index(&self) -> &ConfigIndex {
        &self.index
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Apply one change record.
    pub fn apply_change(&mut self, mut cfg: RouteConfig) -> Result<Applied, ApplyError> {
        if cfg.revision <= self.latest_rev {
            tracing::debug!(
                key = %cfg.key,
                revision = cfg.revision,
                latest_rev = self.latest_rev,
                "Skip old route notification"
            );
            return Ok(Applied::Stale);
        }

        // Resolve and decode before touching anything.
        let previous = self.index.get(&cfg.key);
        let previous_uri = previous.and_then(|entry| entry.live_uri().map(str::to_string));
        let route = if cfg.tombstone && cfg.payload.is_empty() {
            if let Some(entry) = previous {
                cfg.payload = entry.config.payload.clone();
            }
            previous.and_then(|entry| entry.route.clone())
        } else {
            Some(codec::decode(&cfg.payload).map_err(|source| ApplyError {
                key: cfg.key.clone(),
                revision: cfg.revision,
                source,
            })?)
        };

        let key = cfg.key.clone();
        let revision = cfg.revision;
        let tombstone = cfg.tombstone;
        self.index.record(cfg, route.clone());

        let outcome = match (tombstone, route) {
            (false, Some(route)) => {
                if let Some(old_uri) = previous_uri.filter(|uri| *uri != route.uri) {
                    self.release(&old_uri, &key);
                }
                let uri = route.uri.clone();
                tracing::info!(key = %key, revision, uri = %uri, upstream = %route.upstream, "add route");
                self.table.upsert(uri.clone(), route);
                Applied::Upserted { uri }
            }
            (true, Some(route)) => {
                if let Some(old_uri) = previous_uri.filter(|uri| *uri != route.uri) {
                    self.release(&old_uri, &key);
                }
                tracing::info!(key = %key, revision, uri = %route.uri, "del route");
                self.release(&route.uri, &key);
                Applied::Removed {
                    uri: Some(route.uri),
                }
            }
            (_, None) => {
                tracing::info!(key = %key, revision, "Tombstone for unknown key recorded");
                Applied::Removed { uri: None }
            }
        };

        self.latest_rev = self.latest_rev.max(revision);
        Ok(outcome)
    }

    /// Move the watermark past a record that was skipped without applying.
    pub fn skip(&mut self, revision: i64) {
        self.latest_rev = self.latest_rev.max(revision);
    }

    /// Drop `key`'s claim on `uri`, handing it to another live key if any.
    fn release(&self, uri: &str, key: &str) {
        match self.index.owner_of(uri, key) {
            Some(owner) => {
                if let Some(route) = owner.route.clone() {
                    tracing::debug!(uri = %uri, owner = %owner.config.key, "URI falls back to older key");
                    self.table.upsert(uri, route);
                }
            }
            None => {
                self.table.remove(uri);
            }
        }
    }

    /// Current table contents as a plain map, for comparisons.
    pub fn table_routes(&self) -> std::collections::HashMap<String, Route> {
        self.table
            .routes()
            .into_iter()
            .map(|route| (route.uri.clone(), route))
            .collect()
    }
}
