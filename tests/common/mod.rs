//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use route_sync::routing::{encode, Route};
use route_sync::store::{ConfigStore, RouteConfig, StoreError, StoreResult, Subscription, WatchEvent};

/// Encoded payload for a route.
pub fn payload(uri: &str, upstream: &str) -> String {
    encode(&Route::new(uri, upstream))
}

/// A request as seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct Seen {
    pub request_line: String,
    pub head: String,
}

/// Start a programmable mock upstream on an ephemeral port.
///
/// `f` gets the request head and returns `(status line, extra headers, body)`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Seen) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (&'static str, Vec<(String, String)>, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                let request_line = head.lines().next().unwrap_or_default().to_string();

                let (status, headers, body) = f(Seen { request_line, head }).await;
                let mut response = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\n", status, body.len());
                for (name, value) in headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str("Connection: close\r\n\r\n");
                response.push_str(&body);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Start a mock upstream that answers every request with `200` and `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { ("200 OK", Vec::new(), body.to_string()) }).await
}

/// A store whose every answer is scripted by the test.
#[derive(Default)]
pub struct ScriptedStore {
    snapshot: Mutex<Vec<RouteConfig>>,
    history: Mutex<Vec<RouteConfig>>,
    events: Mutex<Option<mpsc::Sender<WatchEvent>>>,
    unreachable: AtomicBool,
    replay_failures: AtomicUsize,
    subscribes: AtomicUsize,
    pings: AtomicUsize,
    hang_pings: AtomicBool,
    pings_in_flight: AtomicUsize,
    replays: Mutex<Vec<i64>>,
}

/// Counts a ping as in flight until its future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_snapshot(snapshot: Vec<RouteConfig>) -> Arc<Self> {
        let store = Self::default();
        *store.snapshot.lock().unwrap() = snapshot;
        Arc::new(store)
    }

    /// Records returned by `replay_since` (filtered by revision).
    pub fn set_history(&self, history: Vec<RouteConfig>) {
        *self.history.lock().unwrap() = history;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make the next `n` replays fail.
    pub fn fail_replays(&self, n: usize) {
        self.replay_failures.store(n, Ordering::SeqCst);
    }

    /// Deliver an event on the current subscription.
    pub async fn send(&self, event: WatchEvent) {
        let tx = self.events.lock().unwrap().clone();
        tx.expect("no active subscription").send(event).await.unwrap();
    }

    /// Close the current subscription.
    pub fn close_subscription(&self) {
        self.events.lock().unwrap().take();
    }

    /// Make every later ping wait forever.
    pub fn hang_pings(&self) {
        self.hang_pings.store(true, Ordering::SeqCst);
    }

    /// Pings started but not yet finished or dropped.
    pub fn pings_in_flight(&self) -> usize {
        self.pings_in_flight.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Watermarks passed to `replay_since`, in call order.
    pub fn replays(&self) -> Vec<i64> {
        self.replays.lock().unwrap().clone()
    }

    fn check(&self) -> StoreResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("scripted outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for ScriptedStore {
    async fn snapshot(&self, _prefix: &str) -> StoreResult<Vec<RouteConfig>> {
        self.check()?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn subscribe(&self, _prefix: &str) -> StoreResult<Subscription> {
        self.check()?;
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (tx, subscription) = Subscription::channel(64);
        *self.events.lock().unwrap() = Some(tx);
        Ok(subscription)
    }

    async fn replay_since(&self, _prefix: &str, revision: i64) -> StoreResult<Vec<RouteConfig>> {
        self.replays.lock().unwrap().push(revision);
        let remaining = self.replay_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.replay_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("scripted replay failure".into()));
        }
        self.check()?;
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|cfg| cfg.revision > revision)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.hang_pings.load(Ordering::SeqCst) {
            self.pings_in_flight.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight(&self.pings_in_flight);
            std::future::pending::<()>().await;
        }
        self.check()
    }
}

/// Await `f`, failing the test if it takes longer than five seconds.
pub async fn within<F: Future>(f: F) -> F::Output {
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("timed out")
}
