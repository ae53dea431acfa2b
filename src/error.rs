//! Handler error type.
//!
//! `ServiceError` is what every operation handler returns on failure. It
//! carries a numeric code used by the response encoder, a machine-readable
//! reason, and a human-readable message that is logged but never written to
//! a client.

use std::collections::BTreeMap;
use std::error::Error as StdError;

use thiserror::Error;

/// Code used when an error has no code of its own.
pub const UNKNOWN_CODE: i32 = 500;
/// Reason attached to errors converted from foreign error types.
pub const UNKNOWN_REASON: &str = "UNKNOWN";

/// Error returned by operation handlers and by the pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error: code = {code} reason = {reason} message = {message}")]
pub struct ServiceError {
    /// Numeric code. Zero means "not classified".
    pub code: i32,
    /// Machine-readable reason, e.g. `USER_NOT_FOUND`.
    pub reason: String,
    /// Developer-facing message. Never serialized into a response.
    pub message: String,
    /// Free-form metadata for logs.
    pub metadata: BTreeMap<String, String>,
}

impl ServiceError {
    pub fn new(code: i32, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn bad_request(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(400, reason, message)
    }

    pub fn internal(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(500, reason, message)
    }

    /// The request was cancelled before it could be served.
    pub fn cancelled() -> Self {
        Self::new(499, "CANCELLED", "context canceled")
    }

    /// The request deadline passed before it could be served.
    pub fn deadline_exceeded() -> Self {
        Self::new(504, "DEADLINE_EXCEEDED", "context deadline exceeded")
    }

    /// Normalize an arbitrary error into a `ServiceError`.
    ///
    /// A `ServiceError` anywhere in the source chain is returned as-is;
    /// anything else becomes an `UNKNOWN` error with code 500.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut current: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(se) = e.downcast_ref::<ServiceError>() {
                return se.clone();
            }
            current = e.source();
        }
        Self::new(UNKNOWN_CODE, UNKNOWN_REASON, err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(&err)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request("INVALID_BODY", err.to_string())
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ServiceError>;
