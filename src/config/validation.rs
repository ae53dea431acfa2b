//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0, addresses parse)
//! - Detect conflicting fixed response codes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::PipelineConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
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

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::new("server.max_body_bytes", "must be greater than 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }
    if obs.max_log_body_bytes == 0 {
        errors.push(ValidationError::new(
            "observability.max_log_body_bytes",
            "must be greater than 0",
        ));
    }

    let r = &config.responses;
    let codes = [
        ("responses.success_code", r.success_code),
        ("responses.not_found_code", r.not_found_code),
        ("responses.method_not_allowed_code", r.method_not_allowed_code),
        ("responses.fallback_error_code", r.fallback_error_code),
    ];
    for (i, (field, code)) in codes.iter().enumerate() {
        if *code <= 0 {
            errors.push(ValidationError::new(field, "must be positive"));
        }
        if codes[..i].iter().any(|(_, other)| other == code) {
            errors.push(ValidationError::new(field, format!("code {code} is already in use")));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
