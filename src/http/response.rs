//! Response handling and error mapping.
//!
//! # Responsibilities
//! - Map forwarding failures to gateway status codes
//! - Hand upstream responses back without buffering
//!
//! # Design Decisions
//! - Upstream timeouts result in 504 Gateway Timeout
//! - Every other forwarding failure is a 502; none terminate the process

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// A request that could not be relayed to its upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream uri {0}")]
    InvalidUpstream(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream timed out after {0}s")]
    Timeout(u64),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUpstream(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match self {
            ProxyError::Timeout(_) => "upstream timeout\n",
            _ => "bad gateway\n",
        };
        (self.status(), body).into_response()
    }
}
