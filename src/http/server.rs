//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create Axum Router with a catch-all proxy handler
//! - Wire up middleware (tracing, request ID)
//! - Look up each request path in the routing table
//! - Forward hits to their upstream and relay the response verbatim
//! - Observability (metrics, correlation IDs)

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::UpstreamConfig;
use crate::http::request::{request_id, strip_hop_by_hop, upstream_uri, MakeRequestUuidV4};
use crate::http::response::ProxyError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::routing::{Route, RoutingTable};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<RoutingTable>,
    pub client: Client<HttpConnector, Body>,
    pub request_timeout: Duration,
}

/// Data-plane proxy reading from a shared routing table.
pub struct ProxyServer {
    router: Router,
}

impl ProxyServer {
    pub fn new(table: Arc<RoutingTable>, upstream: &UpstreamConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(upstream.connect_timeout_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            table,
            client,
            request_timeout: Duration::from_secs(upstream.request_timeout_secs),
        };

        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
    }

    /// The router, for embedding or driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Proxy server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

/// Looks up the route for the request path and forwards it.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let Some(route) = state.table.lookup(&path) else {
        tracing::debug!(request_id = %request_id, path = %path, "No route matched");
        metrics::record_request(&method, 404, start_time);
        return (StatusCode::NOT_FOUND, "no route\n").into_response();
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        upstream = %route.upstream,
        "Proxying request"
    );

    match forward(&state, &route, request).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), start_time);
            response
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, upstream = %route.upstream, error = %e, "Upstream error");
            metrics::record_request(&method, e.status().as_u16(), start_time);
            e.into_response()
        }
    }
}

async fn forward(
    state: &AppState,
    route: &Route,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let (mut parts, body) = request.into_parts();
    parts.uri = upstream_uri(route, &parts.uri)?;
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.remove(header::HOST);

    let upstream_request = Request::from_parts(parts, body);
    let response = tokio::time::timeout(state.request_timeout, state.client.request(upstream_request))
        .await
        .map_err(|_| ProxyError::Timeout(state.request_timeout.as_secs()))??;

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Ok(Response::from_parts(parts, Body::new(body)))
}
