//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (windows > 0, backoff bounds ordered)
//! - Check the routing prefix is a key path
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::SyncConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a socket address", value),
        ));
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.control_plane.enabled {
        check_addr(
            &mut errors,
            "control_plane.bind_address",
            &config.control_plane.bind_address,
        );
    }

    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let reconciler = &config.reconciler;
    if !reconciler.prefix.starts_with('/') {
        errors.push(ValidationError::new(
            "reconciler.prefix",
            "must start with '/'",
        ));
    }
    if reconciler.liveness_window_ms == 0 {
        errors.push(ValidationError::new(
            "reconciler.liveness_window_ms",
            "must be greater than 0",
        ));
    }
    if reconciler.subscription_buffer == 0 {
        errors.push(ValidationError::new(
            "reconciler.subscription_buffer",
            "must be greater than 0",
        ));
    }
    if reconciler.retry_base_delay_ms > reconciler.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "reconciler.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "upstream.request_timeout_secs",
            "must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
