//! route-sync data-plane node.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                     ROUTE-SYNC                        │
//!   routectl      │  ┌─────────┐   put/delete   ┌──────────────┐         │
//!  ───────────────┼─▶│  admin  │───────────────▶│    store     │         │
//!                 │  └─────────┘                │  (revisions) │         │
//!                 │                             └──────┬───────┘         │
//!                 │              snapshot | changes    │  ▲ ping         │
//!                 │                                    ▼  │              │
//!                 │                             ┌──────────────┐         │
//!                 │                             │  reconciler  │         │
//!                 │                             └──────┬───────┘         │
//!                 │                                    ▼                 │
//!   Client        │  ┌─────────┐   lookup       ┌──────────────┐         │
//!  ───────────────┼─▶│  http   │───────────────▶│ routing table│         │
//!                 │  │  proxy  │                └──────────────┘         │
//!                 │  └────┬────┘                                         │
//!                 └───────┼──────────────────────────────────────────────┘
//!                         ▼
//!                     upstream
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use route_sync::admin::{setup_admin_router, AdminState};
use route_sync::config::{load_config, SyncConfig};
use route_sync::lifecycle::{wait_for_signal, Shutdown};
use route_sync::observability::{logging, metrics};
use route_sync::sync::Phase;
use route_sync::{MemoryStore, ProxyServer, Reconciler, RoutingTable};

#[derive(Parser)]
#[command(name = "route-sync", version, about = "Route-synchronizing data-plane proxy")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SyncConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "route-sync starting");
    tracing::info!(
        listener = %config.listener.bind_address,
        prefix = %config.reconciler.prefix,
        decode_policy = ?config.reconciler.decode_policy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let store = Arc::new(MemoryStore::with_buffer(config.reconciler.subscription_buffer));
    let table = Arc::new(RoutingTable::new());

    // The table must reflect the store before any traffic is accepted.
    let mut handle = Reconciler::new(store.clone(), table.clone(), config.reconciler.clone())
        .start(shutdown.subscribe())
        .await?;

    let mut servers = Vec::new();

    if config.control_plane.enabled {
        let listener = TcpListener::bind(&config.control_plane.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Control-plane API listening");
        let app = setup_admin_router(AdminState {
            store: store.clone(),
            table: table.clone(),
            sync: handle.status_receiver(),
            api_key: Arc::from(config.control_plane.api_key.as_str()),
        });
        let stop = shutdown.wait();
        servers.push(tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(stop).await
        }));
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let proxy = ProxyServer::new(table, &config.upstream);
    let proxy_shutdown = shutdown.clone();
    servers.push(tokio::spawn(async move { proxy.run(listener, proxy_shutdown).await }));

    tokio::select! {
        _ = wait_for_signal() => {}
        status = handle.wait_for(|s| s.phase == Phase::Failed) => {
            tracing::error!(latest_rev = status.latest_rev, "Reconciler failed, shutting down");
        }
    }
    shutdown.trigger();

    let result = handle.join().await;
    for server in servers {
        if let Ok(Err(e)) = server.await {
            tracing::error!(error = %e, "Server exited with error");
        }
    }

    match result {
        Ok(state) => {
            tracing::info!(latest_rev = state.latest_rev(), "Shutdown complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Reconciler stopped with error");
            Err(e.into())
        }
    }
}
