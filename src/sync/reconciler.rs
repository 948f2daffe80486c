//! Change-stream reconciler.
//!
//! # States
//! ```text
//! BOOTSTRAPPING ──▶ LISTENING ⇄ CATCHUP
//!       │                │
//!       ▼                ▼
//!    FAILED           STOPPED
//! ```
//!
//! - BOOTSTRAPPING: subscribe first, then snapshot, so nothing committed in
//!   between is lost. Any failure here is fatal.
//! - LISTENING: apply live changes; probe the store when the stream is quiet.
//! - CATCHUP: after a reconnect signal, replay everything above the watermark.
//!
//! One task owns the state machine and is the only writer of the index and
//! the routing table.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::{DecodePolicy, ReconcilerConfig};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::routing::RoutingTable;
use crate::store::{ConfigStore, RouteConfig, Subscription, WatchEvent};
use crate::sync::apply::{Applied, RouteState};
use crate::sync::error::{SyncError, SyncResult};

/// Reconciler state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Bootstrapping,
    Listening,
    Catchup,
    Failed,
    Stopped,
}

/// Progress published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: Phase,
    pub latest_rev: i64,
    pub routes: usize,
    pub applied: u64,
    pub stale: u64,
    pub skipped: u64,
    pub reconnects: u64,
    pub probes: u64,
}

/// Drives a routing table from a [`ConfigStore`].
pub struct Reconciler<S: ConfigStore> {
    store: Arc<S>,
    config: ReconcilerConfig,
    state: RouteState,
    stats: SyncStatus,
    status_tx: watch::Sender<SyncStatus>,
}

impl<S: ConfigStore> Reconciler<S> {
    /// Create a reconciler that will write into `table`.
    pub fn new(store: Arc<S>, table: Arc<RoutingTable>, config: ReconcilerConfig) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            config,
            state: RouteState::new(table),
            stats: SyncStatus::default(),
            status_tx,
        }
    }

    /// Bootstrap the table, then keep it in sync on a background task.
    ///
    /// Returns once the table reflects the store's snapshot. A bootstrap
    /// error is returned to the caller, which must not serve traffic.
    pub async fn start(
        mut self,
        shutdown: broadcast::Receiver<()>,
    ) -> SyncResult<ReconcilerHandle> {
        let status = self.status_tx.subscribe();

        let subscription = match self.bootstrap().await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = %e, "Reconciler bootstrap failed");
                self.set_phase(Phase::Failed);
                return Err(e);
            }
        };

        let task = tokio::spawn(self.run(subscription, shutdown));
        Ok(ReconcilerHandle { status, task })
    }

    async fn bootstrap(&mut self) -> SyncResult<Subscription> {
        let prefix = self.config.prefix.clone();
        self.set_phase(Phase::Bootstrapping);

        // Listen first: a change landing between snapshot and subscribe
        // would otherwise be lost.
        let subscription = self
            .store
            .subscribe(&prefix)
            .await
            .map_err(SyncError::Bootstrap)?;

        tracing::info!(prefix = %prefix, "get all routes...");
        let mut snapshot = self
            .store
            .snapshot(&prefix)
            .await
            .map_err(SyncError::Bootstrap)?;
        snapshot.sort_by_key(|cfg| cfg.revision);

        let rows = snapshot.len();
        for cfg in snapshot {
            self.state
                .apply_change(cfg)
                .map_err(SyncError::CorruptSnapshot)?;
            self.stats.applied += 1;
        }

        tracing::info!(
            rows,
            routes = self.state.table().len(),
            latest_rev = self.state.latest_rev(),
            "Bootstrap complete, start watching"
        );
        self.set_phase(Phase::Listening);
        Ok(subscription)
    }

    async fn run(
        mut self,
        subscription: Subscription,
        mut shutdown: broadcast::Receiver<()>,
    ) -> SyncResult<RouteState> {
        match self.listen(subscription, &mut shutdown).await {
            Ok(()) => {
                self.set_phase(Phase::Stopped);
                tracing::info!(latest_rev = self.state.latest_rev(), "Reconciler stopped");
                Ok(self.state)
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconciler failed");
                self.set_phase(Phase::Failed);
                Err(e)
            }
        }
    }

    async fn listen(
        &mut self,
        mut subscription: Subscription,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SyncResult<()> {
        let window = Duration::from_millis(self.config.liveness_window_ms);

        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Reconciler received shutdown signal, exiting loop");
                    return Ok(());
                }
                next = timeout(window, subscription.next()) => next,
            };

            match next {
                Ok(Some(WatchEvent::Change(cfg))) => self.on_change(cfg)?,
                Ok(Some(WatchEvent::Reconnected)) => {
                    self.stats.reconnects += 1;
                    metrics::record_reconnect();
                    tracing::warn!(
                        latest_rev = self.state.latest_rev(),
                        "Change stream reconnected, catching up"
                    );
                    if !self.catch_up(shutdown).await? {
                        return Ok(());
                    }
                }
                Ok(Some(WatchEvent::Malformed(reason))) => {
                    if !self.on_malformed(reason, shutdown).await? {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    tracing::warn!("Subscription closed by store, resubscribing");
                    drop(subscription);
                    subscription = match self.resubscribe(shutdown).await {
                        Some(subscription) => subscription,
                        None => return Ok(()),
                    };
                    self.stats.reconnects += 1;
                    metrics::record_reconnect();
                    if !self.catch_up(shutdown).await? {
                        return Ok(());
                    }
                }
                Err(_) => self.probe(window),
            }
        }
    }

    fn on_change(&mut self, cfg: RouteConfig) -> SyncResult<()> {
        let key = cfg.key.clone();
        let revision = cfg.revision;
        let watch_delay = cfg.watch_delay(Utc::now());

        match self.state.apply_change(cfg) {
            Ok(Applied::Stale) => {
                self.stats.stale += 1;
                metrics::record_change(Applied::Stale.label());
            }
            Ok(outcome) => {
                self.stats.applied += 1;
                metrics::record_change(outcome.label());
                if let Some(delay) = watch_delay {
                    metrics::record_watch_delay(delay);
                    tracing::debug!(
                        key = %key,
                        revision,
                        watch_delay_ms = delay.as_millis() as u64,
                        "receive route notification"
                    );
                }
            }
            Err(e) => match self.config.decode_policy {
                DecodePolicy::Skip => {
                    tracing::error!(error = %e, "Skipping undecodable route record");
                    metrics::record_decode_failure();
                    self.state.skip(revision);
                    self.stats.skipped += 1;
                }
                DecodePolicy::Strict => {
                    metrics::record_decode_failure();
                    return Err(SyncError::Decode(e));
                }
            },
        }

        self.publish();
        Ok(())
    }

    /// A notification that does not parse hides a change of unknown
    /// revision, so under the skip policy the gap is closed with a catch-up.
    async fn on_malformed(
        &mut self,
        reason: String,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SyncResult<bool> {
        metrics::record_decode_failure();
        match self.config.decode_policy {
            DecodePolicy::Skip => {
                tracing::error!(error = %reason, "Skipping malformed notification, catching up");
                self.stats.skipped += 1;
                self.publish();
                self.catch_up(shutdown).await
            }
            DecodePolicy::Strict => Err(SyncError::Malformed(reason)),
        }
    }

    /// Replay everything above the watermark. Returns `false` if shutdown
    /// arrived while waiting to retry.
    async fn catch_up(&mut self, shutdown: &mut broadcast::Receiver<()>) -> SyncResult<bool> {
        self.set_phase(Phase::Catchup);
        let prefix = self.config.prefix.clone();
        let since = self.state.latest_rev();

        let mut attempt = 0;
        let mut records = loop {
            match self.store.replay_since(&prefix, since).await {
                Ok(records) => break records,
                Err(e) => {
                    attempt += 1;
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(error = %e, attempt, delay = ?delay, "Catch-up query failed, retrying");
                    tokio::select! {
                        _ = shutdown.recv() => return Ok(false),
                        _ = sleep(delay) => {}
                    }
                }
            }
        };
        records.sort_by_key(|cfg| cfg.revision);

        let replayed = records.len();
        for cfg in records {
            self.on_change(cfg)?;
        }

        tracing::info!(
            since,
            replayed,
            latest_rev = self.state.latest_rev(),
            "Catch-up complete"
        );
        self.set_phase(Phase::Listening);
        Ok(true)
    }

    async fn resubscribe(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Option<Subscription> {
        let mut attempt = 0;
        loop {
            match self.store.subscribe(&self.config.prefix).await {
                Ok(subscription) => {
                    tracing::info!(attempt, "Resubscribed to change stream");
                    return Some(subscription);
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(error = %e, attempt, delay = ?delay, "Subscribe failed, retrying");
                    tokio::select! {
                        _ = shutdown.recv() => return None,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Nudge the transport without blocking the consume loop.
    fn probe(&mut self, window: Duration) {
        tracing::info!(
            window_ms = window.as_millis() as u64,
            "Received no events within liveness window, checking connection"
        );
        self.stats.probes += 1;
        self.publish();

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match timeout(window, store.ping()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "listener ping error");
                    metrics::record_probe_failure();
                }
                Err(_) => {
                    tracing::warn!(window_ms = window.as_millis() as u64, "listener ping timed out");
                    metrics::record_probe_failure();
                }
            }
        });
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.config.retry_base_delay_ms,
            self.config.retry_max_delay_ms,
        )
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.stats.phase != phase {
            tracing::debug!(from = ?self.stats.phase, to = ?phase, "Reconciler phase change");
        }
        self.stats.phase = phase;
        self.publish();
    }

    fn publish(&mut self) {
        self.stats.latest_rev = self.state.latest_rev();
        self.stats.routes = self.state.table().len();
        metrics::set_latest_revision(self.stats.latest_rev);
        metrics::set_route_count(self.stats.routes);
        self.status_tx.send_replace(self.stats.clone());
    }
}

/// Handle to a running reconciler.
pub struct ReconcilerHandle {
    status: watch::Receiver<SyncStatus>,
    task: JoinHandle<SyncResult<RouteState>>,
}

impl ReconcilerHandle {
    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status update.
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `pred`, or the reconciler exits.
    pub async fn wait_for(&mut self, pred: impl FnMut(&SyncStatus) -> bool) -> SyncStatus {
        let reached = self.status.wait_for(pred).await.map(|status| status.clone());
        reached.unwrap_or_else(|_| self.status.borrow().clone())
    }

    /// Wait until the watermark reaches `revision`.
    pub async fn wait_for_revision(&mut self, revision: i64) -> SyncStatus {
        self.wait_for(|status| status.latest_rev >= revision).await
    }

    /// Whether the reconciler task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the reconciler to exit and take back its final state.
    pub async fn join(self) -> SyncResult<RouteState> {
        self.task
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::routing::{encode, Route};
    use crate::store::MemoryStore;

    fn payload(uri: &str, upstream: &str) -> String {
        encode(&Route::new(uri, upstream))
    }

    fn config() -> ReconcilerConfig {
        ReconcilerConfig {
            liveness_window_ms: 60_000,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 50,
            ..ReconcilerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.set_reachable(false);
        let table = Arc::new(RoutingTable::new());
        let shutdown = Shutdown::new();

        let result = Reconciler::new(store, table.clone(), config())
            .start(shutdown.subscribe())
            .await;

        assert!(matches!(result, Err(SyncError::Bootstrap(_))));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_fatal_even_when_skipping() {
        let store = Arc::new(MemoryStore::new());
        store.put("/routes/a", payload("/a", "http://u1")).unwrap();
        store.put("/routes/b", "definitely not a route").unwrap();
        let shutdown = Shutdown::new();

        let result = Reconciler::new(store, Arc::new(RoutingTable::new()), config())
            .start(shutdown.subscribe())
            .await;

        assert!(matches!(result, Err(SyncError::CorruptSnapshot(_))));
    }

    #[tokio::test]
    async fn test_live_changes_and_shutdown() {
        let store = Arc::new(MemoryStore::new());
        store.put("/routes/a", payload("/a", "http://u1")).unwrap();
        let table = Arc::new(RoutingTable::new());
        let shutdown = Shutdown::new();

        let mut handle = Reconciler::new(store.clone(), table.clone(), config())
            .start(shutdown.subscribe())
            .await
            .unwrap();
        assert_eq!(handle.status().phase, Phase::Listening);
        assert_eq!(handle.status().latest_rev, 1);

        let rev = store.put("/routes/b", payload("/b", "http://u2")).unwrap();
        handle.wait_for_revision(rev).await;
        assert_eq!(table.lookup("/b").unwrap().upstream, "http://u2");

        shutdown.trigger();
        let state = handle.join().await.unwrap();
        assert_eq!(state.latest_rev(), 2);
        assert_eq!(state.index().len(), 2);
    }

    #[tokio::test]
    async fn test_strict_policy_stops_on_bad_record() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let mut config = config();
        config.decode_policy = DecodePolicy::Strict;

        let mut handle = Reconciler::new(store.clone(), Arc::new(RoutingTable::new()), config)
            .start(shutdown.subscribe())
            .await
            .unwrap();

        store.put("/routes/bad", "garbage").unwrap();
        let status = handle.wait_for(|s| s.phase == Phase::Failed).await;
        assert_eq!(status.phase, Phase::Failed);
        assert!(matches!(handle.join().await, Err(SyncError::Decode(_))));
    }

    #[tokio::test]
    async fn test_strict_policy_stops_on_malformed_notification() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let mut config = config();
        config.decode_policy = DecodePolicy::Strict;

        let mut handle = Reconciler::new(store.clone(), Arc::new(RoutingTable::new()), config)
            .start(shutdown.subscribe())
            .await
            .unwrap();

        store.publish_raw(r#"{"key":"/routes/a","value":"eA==","revision":"oops"}"#);
        let status = handle.wait_for(|s| s.phase == Phase::Failed).await;
        assert_eq!(status.latest_rev, 0);
        assert!(matches!(handle.join().await, Err(SyncError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_malformed_notification_is_skipped_and_gap_recovered() {
        let store = Arc::new(MemoryStore::new());
        let table = Arc::new(RoutingTable::new());
        let shutdown = Shutdown::new();

        let mut handle = Reconciler::new(store.clone(), table.clone(), config())
            .start(shutdown.subscribe())
            .await
            .unwrap();

        // The real change is committed but its notification arrives garbled.
        store.suspend_notifications();
        let rev = store.put("/routes/a", payload("/a", "http://u1")).unwrap();
        store.publish_raw("{garbled");

        let status = handle.wait_for(|s| s.latest_rev >= rev && s.phase == Phase::Listening).await;
        assert_eq!(status.skipped, 1);
        assert_eq!(table.lookup("/a").unwrap().upstream, "http://u1");
        shutdown.trigger();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_skip_policy_keeps_consuming() {
        let store = Arc::new(MemoryStore::new());
        let table = Arc::new(RoutingTable::new());
        let shutdown = Shutdown::new();

        let mut handle = Reconciler::new(store.clone(), table.clone(), config())
            .start(shutdown.subscribe())
            .await
            .unwrap();

        store.put("/routes/bad", "garbage").unwrap();
        let rev = store.put("/routes/a", payload("/a", "http://u1")).unwrap();
        let status = handle.wait_for_revision(rev).await;

        assert_eq!(status.skipped, 1);
        assert_eq!(status.phase, Phase::Listening);
        assert!(table.lookup("/a").is_some());
        shutdown.trigger();
        let state = handle.join().await.unwrap();
        assert!(state.index().get("/routes/bad").is_none());
    }
}
