//! Responses for unmatched routes and unsupported methods.
//!
//! Both write a real 404/405 status and a code-only envelope. Nothing from
//! the request is echoed back.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::schema::ResponseConfig;
use crate::encoding::envelope::{EncodedResponse, Envelope};
use crate::observability::metrics::MetricsSink;

pub const REASON_NOT_FOUND: &str = "not_found";
pub const REASON_METHOD_NOT_ALLOWED: &str = "method_not_allowed";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Fallback handlers shared by every route.
#[derive(Clone)]
pub struct RouteFallbacks {
    not_found_code: i32,
    method_not_allowed_code: i32,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl RouteFallbacks {
    pub fn new(config: &ResponseConfig, metrics: Option<Arc<dyn MetricsSink>>) -> Self {
        Self {
            not_found_code: config.not_found_code,
            method_not_allowed_code: config.method_not_allowed_code,
            metrics,
        }
    }

    pub fn not_found(&self, method: &Method, path: &str) -> Response {
        if let Some(sink) = &self.metrics {
            sink.inc_errors(method.as_str(), path, REASON_NOT_FOUND);
        }
        tracing::warn!(method = %method, path = %path, "Route not found");
        code_only(StatusCode::NOT_FOUND, self.not_found_code, br#"{"code":404}"#)
    }

    pub fn method_not_allowed(&self, method: &Method, path: &str) -> Response {
        if let Some(sink) = &self.metrics {
            sink.inc_errors(method.as_str(), path, REASON_METHOD_NOT_ALLOWED);
        }
        tracing::warn!(method = %method, path = %path, "Method not allowed");
        code_only(
            StatusCode::METHOD_NOT_ALLOWED,
            self.method_not_allowed_code,
            br#"{"code":405}"#,
        )
    }
}

fn code_only(status: StatusCode, code: i32, fallback: &'static [u8]) -> Response {
    let body = match serde_json::to_vec(&Envelope::code_only(code)) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, code, "Failed to encode fallback envelope");
            fallback.to_vec()
        }
    };
    EncodedResponse::new(status, JSON_CONTENT_TYPE, body).into_response()
}
