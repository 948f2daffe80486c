//! Store contract consumed by the reconciler.
//!
//! The durable store is an external collaborator. Everything the reconciler
//! needs from it is pinned here: a point snapshot, an ordered change stream
//! with explicit reconnect signalling, a revision-ranged replay that includes
//! tombstones, and a cheap liveness probe.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// A change record for one key, as stored and as notified.
///
/// Serializes to the notification schema
/// `{key, value, revision, tombstone, create_time}`; `value` is omitted on
/// tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Key path, e.g. `/routes/a`.
    pub key: String,

    /// Encoded route payload. Empty on tombstones that do not carry it.
    #[serde(rename = "value", default, skip_serializing_if = "String::is_empty")]
    pub payload: String,

    /// Store-assigned revision, unique and increasing across all keys.
    pub revision: i64,

    #[serde(default)]
    pub tombstone: bool,

    /// Commit time, used only to measure watch delay.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "create_time_format"
    )]
    pub create_time: Option<NaiveDateTime>,
}

impl RouteConfig {
    /// A live record.
    pub fn live(key: impl Into<String>, payload: impl Into<String>, revision: i64) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            revision,
            tombstone: false,
            create_time: None,
        }
    }

    /// A tombstone without a payload.
    pub fn deleted(key: impl Into<String>, revision: i64) -> Self {
        Self {
            key: key.into(),
            payload: String::new(),
            revision,
            tombstone: true,
            create_time: None,
        }
    }

    pub fn with_create_time(mut self, create_time: NaiveDateTime) -> Self {
        self.create_time = Some(create_time);
        self
    }

    /// Parse a notification payload.
    pub fn from_notification(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Render this record as a notification payload.
    pub fn to_notification(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Time between commit and `now`, when the commit time is known.
    pub fn watch_delay(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let created = self.create_time?.and_utc();
        (now - created).to_std().ok()
    }
}

/// Timezone-less commit timestamps, microsecond precision.
mod create_time_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// One item of the change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A committed mutation.
    Change(RouteConfig),
    /// The transport reconnected; notifications may have been lost.
    Reconnected,
    /// A notification arrived that does not parse. Its revision is unknown.
    Malformed(String),
}

/// Receiving side of a change-stream subscription.
///
/// Dropping it releases the subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<WatchEvent>,
}

impl Subscription {
    /// Create a subscription and the sender a store adapter feeds it through.
    pub fn channel(buffer: usize) -> (mpsc::Sender<WatchEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }

    /// Next event, or `None` once the store closed the subscription.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// Errors returned by a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the query.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The key does not exist (or is deleted).
    #[error("key not found: {0}")]
    NotFound(String),

    /// The store has shut down.
    #[error("store closed")]
    Closed,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The store operations the reconciler depends on.
#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// Live records under `prefix`, ordered by revision ascending.
    async fn snapshot(&self, prefix: &str) -> StoreResult<Vec<RouteConfig>>;

    /// Subscribe to changes under `prefix`.
    ///
    /// Delivery is at-least-once while connected; a reconnect is signalled
    /// with [`WatchEvent::Reconnected`] and may hide a gap.
    async fn subscribe(&self, prefix: &str) -> StoreResult<Subscription>;

    /// Records under `prefix` with revision strictly greater than
    /// `revision`, tombstones included, ordered ascending.
    async fn replay_since(&self, prefix: &str, revision: i64) -> StoreResult<Vec<RouteConfig>>;

    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;
}
