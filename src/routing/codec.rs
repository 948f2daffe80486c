//! Route payload codec.
//!
//! A stored payload is the standard base64 encoding of a compact JSON object
//! `{"uri": ..., "upstream": ...}`. Decoding is pure and also checks that the
//! decoded route is usable by the proxy: the URI is an absolute path and the
//! upstream an absolute http(s) URL.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// A decoded route: requests for `uri` are forwarded to `upstream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Request path this route matches exactly.
    pub uri: String,
    /// Base URL of the upstream, without a trailing path.
    pub upstream: String,
}

impl Route {
    pub fn new(uri: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            upstream: upstream.into(),
        }
    }

    /// Check the route is something the proxy can serve.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if !self.uri.starts_with('/') {
            return Err(DecodeError::Invalid(format!(
                "uri '{}' must start with '/'",
                self.uri
            )));
        }
        let upstream = Url::parse(&self.upstream).map_err(|e| {
            DecodeError::Invalid(format!("upstream '{}': {}", self.upstream, e))
        })?;
        match upstream.scheme() {
            "http" | "https" => Ok(()),
            other => Err(DecodeError::Invalid(format!(
                "upstream scheme '{}' is not http(s)",
                other
            ))),
        }
    }
}

/// Errors produced while decoding a route payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid base64.
    #[error("payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded bytes are not a route object.
    #[error("payload is not a route object: {0}")]
    Json(#[from] serde_json::Error),

    /// Route decoded but cannot be served.
    #[error("invalid route: {0}")]
    Invalid(String),

    /// Tombstone without a payload for a key with no known history.
    #[error("no payload available to resolve")]
    Missing,
}

/// Decode a stored payload into a [`Route`].
pub fn decode(payload: &str) -> Result<Route, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Missing);
    }
    let raw = STANDARD.decode(payload.trim())?;
    let route: Route = serde_json::from_slice(&raw)?;
    route.validate()?;
    Ok(route)
}

/// Encode a route into its stored payload form.
pub fn encode(route: &Route) -> String {
    // Serializing two owned strings into JSON cannot fail.
    let json = serde_json::to_vec(route).unwrap_or_default();
    STANDARD.encode(json)
}

/// Compact a JSON route body and encode it as a payload.
///
/// Used by the write API, which accepts route bodies as sent by clients.
pub fn encode_json(body: &[u8]) -> Result<String, DecodeError> {
    let route: Route = serde_json::from_slice(body)?;
    route.validate()?;
    Ok(encode(&route))
}
