//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::observability::body::{DEFAULT_MAX_BODY_BYTES, DEFAULT_REDACTED_HEADERS};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Listener and request handling settings.
    pub server: ServerConfig,

    /// Logging, metrics and body-logging settings.
    pub observability: ObservabilityConfig,

    /// Fixed response codes.
    pub responses: ResponseConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Endpoint reported to middleware. Derived from the bind address when empty.
    pub endpoint: String,

    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// The configured endpoint, or `http://{bind_address}`.
    pub fn endpoint(&self) -> String {
        if self.endpoint.is_empty() {
            format!("http://{}", self.bind_address)
        } else {
            self.endpoint.clone()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            endpoint: String::new(),
            request_timeout_secs: 10,
            max_body_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the metrics exporter and per-request metrics.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Largest request/response body written to logs verbatim.
    pub max_log_body_bytes: usize,

    /// Header names whose values are masked in logs.
    pub redacted_headers: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            max_log_body_bytes: DEFAULT_MAX_BODY_BYTES,
            redacted_headers: DEFAULT_REDACTED_HEADERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Fixed codes written into response envelopes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub success_code: i32,
    pub success_message: String,
    pub not_found_code: i32,
    pub method_not_allowed_code: i32,
    /// Used when an error carries no code of its own.
    pub fallback_error_code: i32,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            success_code: 200,
            success_message: "success".to_string(),
            not_found_code: 404,
            method_not_allowed_code: 405,
            fallback_error_code: 500,
        }
    }
}
