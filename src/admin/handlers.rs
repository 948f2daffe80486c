use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::admin::AdminState;
use crate::routing::{codec, DecodeError, Route};
use crate::store::{RouteConfig, StoreError};
use crate::sync::SyncStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Written {
    pub revision: i64,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("invalid route body: {0}")]
    InvalidBody(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            AdminError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            AdminError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// `{*key}` captures without the leading slash.
fn store_key(key: &str) -> String {
    format!("/{}", key.trim_start_matches('/'))
}

pub async fn put_key(
    State(state): State<AdminState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<Written>, AdminError> {
    let key = store_key(&key);
    let payload = codec::encode_json(&body)?;
    let revision = state.store.put(&key, payload)?;
    tracing::info!(key = %key, revision, "Route written");
    Ok(Json(Written { revision }))
}

pub async fn delete_key(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<Written>, AdminError> {
    let key = store_key(&key);
    let revision = state.store.delete(&key)?;
    tracing::info!(key = %key, revision, "Route deleted");
    Ok(Json(Written { revision }))
}

/// Current record for a live key. Query parameters are ignored.
pub async fn get_key(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> Result<Json<RouteConfig>, AdminError> {
    Ok(Json(state.store.get(&store_key(&key))?))
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

pub async fn get_sync(State(state): State<AdminState>) -> Json<SyncStatus> {
    Json(state.sync.borrow().clone())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<Route>> {
    Json(state.table.routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::setup_admin_router;
    use crate::routing::RoutingTable;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::sync::Arc;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn state(api_key: &str) -> AdminState {
        let (_tx, sync) = watch::channel(SyncStatus::default());
        AdminState {
            store: Arc::new(MemoryStore::new()),
            table: Arc::new(RoutingTable::new()),
            sync,
            api_key: Arc::from(api_key),
        }
    }

    async fn send(state: &AdminState, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = setup_admin_router(state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn put(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let state = state("");

        let (status, json) = send(
            &state,
            put("/keys/routes/a", r#"{"uri":"/a","upstream":"http://u1"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["revision"], 1);

        let (status, json) = send(
            &state,
            Request::builder().uri("/keys/routes/a").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["key"], "/routes/a");
        assert_eq!(
            codec::decode(json["value"].as_str().unwrap()).unwrap(),
            Route::new("/a", "http://u1")
        );

        let (status, json) = send(
            &state,
            Request::builder()
                .method("DELETE")
                .uri("/keys/routes/a")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["revision"], 2);

        let (status, _) = send(
            &state,
            Request::builder().uri("/keys/routes/a").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_returns_current_record_only() {
        let state = state("");
        state.store.put("/routes/a", "old").unwrap();
        state.store.put("/routes/a", "new").unwrap();

        let (status, json) = send(
            &state,
            Request::builder().uri("/keys/routes/a?rev=1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["revision"], 2);
        assert_eq!(json["value"], "new");
    }

    #[tokio::test]
    async fn test_invalid_body_is_400() {
        let state = state("");
        let (status, _) = send(&state, put("/keys/routes/a", r#"{"uri":"a"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.store.revision(), 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_404() {
        let state = state("");
        let (status, _) = send(
            &state,
            Request::builder()
                .method("DELETE")
                .uri("/keys/routes/none")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bearer_auth() {
        let state = state("secret");
        let (status, _) = send(
            &state,
            Request::builder().uri("/admin/status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, json) = send(
            &state,
            Request::builder()
                .uri("/admin/status")
                .header(header::AUTHORIZATION, "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "operational");
    }

    #[tokio::test]
    async fn test_sync_and_routes() {
        let state = state("");
        state.table.upsert("/a", Route::new("/a", "http://u1"));

        let (_, json) = send(
            &state,
            Request::builder().uri("/admin/sync").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(json["phase"], "bootstrapping");

        let (_, json) = send(
            &state,
            Request::builder().uri("/admin/routes").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(json[0]["upstream"], "http://u1");
    }
}
