//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a data-plane node.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a route-sync node.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Proxy listener configuration.
    pub listener: ListenerConfig,

    /// Control-plane write API.
    pub control_plane: ControlPlaneConfig,

    /// Change-stream reconciler settings.
    pub reconciler: ReconcilerConfig,

    /// Upstream forwarding timeouts.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration for the proxy front end.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9080".to_string(),
        }
    }
}

/// Control-plane API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Serve the write API and sync status endpoints.
    pub enabled: bool,

    /// Bind address for the control-plane API.
    pub bind_address: String,

    /// Bearer token required on every request. Empty disables auth.
    pub api_key: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:9180".to_string(),
            api_key: String::new(),
        }
    }
}

/// What the reconciler does with a record whose payload cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Log, count and skip the record; keep consuming the stream.
    #[default]
    Skip,
    /// Stop the reconciler and take the node down.
    Strict,
}

/// Change-stream reconciler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Key prefix holding route records.
    pub prefix: String,

    /// Milliseconds without an event before the store is probed.
    pub liveness_window_ms: u64,

    /// Handling of undecodable live or replayed records.
    pub decode_policy: DecodePolicy,

    /// Capacity of the subscription channel.
    pub subscription_buffer: usize,

    /// Base delay for catch-up and resubscribe retries in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for catch-up and resubscribe retries in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            prefix: "/routes/".to_string(),
            liveness_window_ms: 15_000,
            decode_policy: DecodePolicy::Skip,
            subscription_buffer: 1024,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
        }
    }
}

/// Upstream forwarding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Total time allowed for an upstream response, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9080");
        assert_eq!(config.control_plane.bind_address, "127.0.0.1:9180");
        assert_eq!(config.reconciler.prefix, "/routes/");
        assert_eq!(config.reconciler.liveness_window_ms, 15_000);
        assert_eq!(config.reconciler.decode_policy, DecodePolicy::Skip);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [reconciler]
            decode_policy = "strict"
            liveness_window_ms = 5000

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.reconciler.decode_policy, DecodePolicy::Strict);
        assert_eq!(config.reconciler.liveness_window_ms, 5000);
        assert_eq!(config.reconciler.prefix, "/routes/");
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.listener.bind_address, "0.0.0.0:9080");
    }
}
