//! Last-seen record per key.
//!
//! The index is the reconciler's source of truth. It keeps tombstoned entries
//! so a later delete that omits the payload can still be resolved to the URI
//! it must remove, and so the routing table can always be rebuilt from it.

use std::collections::HashMap;

use crate::routing::Route;
use crate::store::RouteConfig;

/// A key's last applied record and the route it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub config: RouteConfig,
    /// `None` only for a tombstone of a key never seen live.
    pub route: Option<Route>,
}

impl IndexEntry {
    pub fn is_live(&self) -> bool {
        !self.config.tombstone
    }

    /// URI this entry currently serves, if live.
    pub fn live_uri(&self) -> Option<&str> {
        if self.is_live() {
            self.route.as_ref().map(|route| route.uri.as_str())
        } else {
            None
        }
    }
}

/// Map from key to its last applied record.
#[derive(Debug, Default)]
pub struct ConfigIndex {
    entries: HashMap<String, IndexEntry>,
}

impl ConfigIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Record `config` under its key, returning the entry it replaced.
    pub fn record(&mut self, config: RouteConfig, route: Option<Route>) -> Option<IndexEntry> {
        self.entries
            .insert(config.key.clone(), IndexEntry { config, route })
    }

    /// The newest live entry other than `except_key` that serves `uri`.
    pub fn owner_of(&self, uri: &str, except_key: &str) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .filter(|(key, entry)| key.as_str() != except_key && entry.live_uri() == Some(uri))
            .map(|(_, entry)| entry)
            .max_by_key(|entry| entry.config.revision)
    }

    /// Rebuild the URI → route view this index implies.
    pub fn derive_routes(&self) -> HashMap<String, Route> {
        let mut winners: HashMap<String, &IndexEntry> = HashMap::new();
        for entry in self.entries.values().filter(|entry| entry.is_live()) {
            let Some(route) = entry.route.as_ref() else {
                continue;
            };
            winners
                .entry(route.uri.clone())
                .and_modify(|current| {
                    if entry.config.revision > current.config.revision {
                        *current = entry;
                    }
                })
                .or_insert(entry);
        }
        winners
            .into_iter()
            .filter_map(|(uri, entry)| entry.route.clone().map(|route| (uri, route)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }
}
