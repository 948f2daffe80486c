//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) when the client sent none
//! - Strip hop-by-hop headers before forwarding
//! - Build the upstream URI from a route and the incoming path
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The client's `Host` is dropped; the upstream authority wins

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::response::ProxyError;
use crate::routing::Route;

pub const X_REQUEST_ID: &str = "x-request-id";

/// `MakeRequestId` that stamps each request with a fresh UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Read the request id stamped by the request-id layer.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove connection-scoped headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Target URI for a request: the route's upstream followed by the incoming
/// path and query.
pub fn upstream_uri(route: &Route, incoming: &Uri) -> Result<Uri, ProxyError> {
    let path_and_query = incoming
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!(
        "{}{}",
        route.upstream.trim_end_matches('/'),
        path_and_query
    );
    target
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidUpstream(format!("{}: {}", target, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_uri_keeps_path_and_query() {
        let route = Route::new("/api", "http://10.0.0.1:8080/");
        let uri: Uri = "/api?x=1".parse().unwrap();
        assert_eq!(
            upstream_uri(&route, &uri).unwrap().to_string(),
            "http://10.0.0.1:8080/api?x=1"
        );
    }

    #[test]
    fn test_upstream_uri_rejects_garbage() {
        let route = Route::new("/api", "http://bad host");
        let uri: Uri = "/api".parse().unwrap();
        assert!(matches!(
            upstream_uri(&route, &uri),
            Err(ProxyError::InvalidUpstream(_))
        ));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-private"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-keep", HeaderValue::from_static("1"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("x-keep"));
    }

    #[test]
    fn test_make_request_id_is_uuid() {
        let request = Request::new(());
        let id = MakeRequestUuidV4.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }
}
