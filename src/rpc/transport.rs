//! Transport metadata carried by the execution context.
//!
//! A `Transport` describes the inbound call as the server saw it: which
//! operation, over which endpoint, with which headers. Reply headers are
//! written by middleware and copied onto the outgoing response by the
//! server adapter once the handler chain returns.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Kind of server transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Grpc,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Grpc => write!(f, "grpc"),
        }
    }
}

/// Server-side view of a single inbound call.
#[derive(Debug)]
pub struct Transport {
    kind: TransportKind,
    endpoint: String,
    operation: String,
    method: Method,
    path: String,
    request_header: HeaderMap,
    reply_header: Mutex<HeaderMap>,
}

impl Transport {
    pub fn new(
        kind: TransportKind,
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        request_header: HeaderMap,
    ) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            operation: operation.into(),
            method,
            path: path.into(),
            request_header,
            reply_header: Mutex::new(HeaderMap::new()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Server endpoint, e.g. `http://127.0.0.1:8000`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fully-qualified operation name, e.g. `/helloworld.Greeter/SayHello`.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn request_header(&self) -> &HeaderMap {
        &self.request_header
    }

    /// Lock the reply headers. A poisoned lock is recovered, never propagated.
    pub fn reply_header(&self) -> MutexGuard<'_, HeaderMap> {
        self.reply_header
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set a reply header. Names are case-insensitive; invalid names or
    /// values are dropped.
    pub fn set_reply_header(&self, name: &str, value: &str) {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = name, "Dropping invalid reply header name");
            return;
        };
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.reply_header().insert(name, v);
            }
            Err(_) => {
                tracing::debug!(header = %name, "Dropping invalid reply header value");
            }
        }
    }

    /// Copy of the reply headers as they are now.
    pub fn reply_header_snapshot(&self) -> HeaderMap {
        self.reply_header().clone()
    }
}
