//! In-process revisioned key space.
//!
//! # Responsibilities
//! - Assign one global, strictly increasing revision to every mutation
//! - Retain tombstones so replays can report deletions
//! - Publish every mutation as a JSON notification on a broadcast channel
//! - Answer snapshot, replay and ping for the reconciler
//!
//! # Design Decisions
//! - Notifications are sent while the key-space lock is held, so publish
//!   order is revision order
//! - A subscriber that falls behind the broadcast buffer gets `Reconnected`
//!   instead of the lost notifications
//! - Fault injection (suspend, sever, unreachable) lets tests and drills
//!   exercise the reconciler's recovery paths

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::store::types::{
    ConfigStore, RouteConfig, StoreError, StoreResult, Subscription, WatchEvent,
};

const DEFAULT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
enum Notice {
    Payload(Arc<str>),
    Reconnected,
    Sever,
}

#[derive(Debug, Default)]
struct KeySpace {
    revision: i64,
    entries: BTreeMap<String, RouteConfig>,
    suspended: bool,
}

/// Revisioned in-memory store with change notifications.
#[derive(Debug)]
pub struct MemoryStore {
    keys: Mutex<KeySpace>,
    notices: broadcast::Sender<Notice>,
    reachable: AtomicBool,
    buffer: usize,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Creates an empty store whose notification and subscription buffers
    /// hold `buffer` events.
    pub fn with_buffer(buffer: usize) -> Self {
        let (notices, _) = broadcast::channel(buffer.max(1));
        Self {
            keys: Mutex::new(KeySpace::default()),
            notices,
            reachable: AtomicBool::new(true),
            buffer: buffer.max(1),
        }
    }

    fn key_space(&self) -> MutexGuard<'_, KeySpace> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_reachable(&self) -> StoreResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store unreachable".to_string()))
        }
    }

    fn commit(&self, keys: &mut KeySpace, record: RouteConfig) -> i64 {
        let revision = record.revision;
        if !keys.suspended {
            let raw: Arc<str> = record.to_notification().into();
            // No receivers is fine: nobody is watching yet.
            let _ = self.notices.send(Notice::Payload(raw));
        }
        keys.entries.insert(record.key.clone(), record);
        revision
    }

    /// Create or update `key`. Returns the new revision.
    pub fn put(&self, key: &str, payload: impl Into<String>) -> StoreResult<i64> {
        self.check_reachable()?;
        let mut keys = self.key_space();
        keys.revision += 1;
        let record = RouteConfig::live(key, payload, keys.revision)
            .with_create_time(Utc::now().naive_utc());
        let revision = self.commit(&mut keys, record);
        tracing::debug!(key = %key, revision, "Key stored");
        Ok(revision)
    }

    /// Delete `key`, leaving a tombstone. Returns the tombstone's revision.
    pub fn delete(&self, key: &str) -> StoreResult<i64> {
        self.check_reachable()?;
        let mut keys = self.key_space();
        match keys.entries.get(key) {
            Some(existing) if !existing.tombstone => {}
            _ => return Err(StoreError::NotFound(key.to_string())),
        }
        keys.revision += 1;
        let record =
            RouteConfig::deleted(key, keys.revision).with_create_time(Utc::now().naive_utc());
        let revision = self.commit(&mut keys, record);
        tracing::debug!(key = %key, revision, "Key deleted");
        Ok(revision)
    }

    /// Current record for a live key.
    pub fn get(&self, key: &str) -> StoreResult<RouteConfig> {
        self.check_reachable()?;
        self.key_space()
            .entries
            .get(key)
            .filter(|record| !record.tombstone)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Latest assigned revision.
    pub fn revision(&self) -> i64 {
        self.key_space().revision
    }

    /// Stop publishing notifications. Mutations still commit.
    pub fn suspend_notifications(&self) {
        self.key_space().suspended = true;
    }

    /// Resume publishing and tell subscribers they may have missed changes.
    pub fn resume_notifications(&self) {
        let mut keys = self.key_space();
        if keys.suspended {
            keys.suspended = false;
            let _ = self.notices.send(Notice::Reconnected);
        }
    }

    /// Close every open subscription.
    pub fn sever_subscriptions(&self) {
        let _ = self.notices.send(Notice::Sever);
    }

    /// Publish a raw notification as-is, bypassing the key space.
    ///
    /// Simulates duplicate, stale or corrupt deliveries.
    pub fn publish_raw(&self, raw: &str) {
        let _ = self.notices.send(Notice::Payload(raw.into()));
    }

    /// Make queries and probes fail (`false`) or succeed (`true`).
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn select(&self, prefix: &str, keep: impl Fn(&RouteConfig) -> bool) -> Vec<RouteConfig> {
        let mut records: Vec<RouteConfig> = self
            .key_space()
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, record)| record)
            .filter(|record| keep(record))
            .cloned()
            .collect();
        records.sort_by_key(|record| record.revision);
        records
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn snapshot(&self, prefix: &str) -> StoreResult<Vec<RouteConfig>> {
        self.check_reachable()?;
        Ok(self.select(prefix, |record| !record.tombstone))
    }

    async fn subscribe(&self, prefix: &str) -> StoreResult<Subscription> {
        self.check_reachable()?;
        let mut notices = self.notices.subscribe();
        let (tx, subscription) = Subscription::channel(self.buffer);
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = tx.closed() => break,
                    notice = notices.recv() => notice,
                };

                let event = match notice {
                    Ok(Notice::Payload(raw)) => match RouteConfig::from_notification(&raw) {
                        Ok(record) if record.key.starts_with(&prefix) => {
                            WatchEvent::Change(record)
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "Malformed notification");
                            WatchEvent::Malformed(e.to_string())
                        }
                    },
                    Ok(Notice::Reconnected) => WatchEvent::Reconnected,
                    Ok(Notice::Sever) => break,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Subscriber lagged, signalling reconnect");
                        WatchEvent::Reconnected
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if tx.send(event).await.is_err() {
                    break;
                }
            }
            tracing::debug!(prefix = %prefix, "Subscription forwarder stopped");
        });

        Ok(subscription)
    }

    async fn replay_since(&self, prefix: &str, revision: i64) -> StoreResult<Vec<RouteConfig>> {
        self.check_reachable()?;
        Ok(self.select(prefix, |record| record.revision > revision))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_reachable()
    }
}
