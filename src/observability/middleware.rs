//! Per-request observability middleware.
//!
//! [`TracerLayer`] wraps a single handler invocation:
//!
//! ```text
//! START → TRACE_BOUND → REQUEST_LOGGED → HANDLER_INVOKED
//!       → RESPONSE_LOGGED → HEADERS_ANNOTATED → METRICS_RECORDED → DONE
//! ```
//!
//! A context that is already done short-circuits before any of this. A
//! context without a transport skips straight to the handler. Handler errors
//! are returned unchanged; everything else the middleware does is best-effort.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{HeaderMap, Method};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::config::schema::ObservabilityConfig;
use crate::error::ServiceError;
use crate::observability::body::{self, DEFAULT_MAX_BODY_BYTES, DEFAULT_REDACTED_HEADERS};
use crate::observability::metrics::MetricsSink;
use crate::observability::trace::{self, TraceIdentity, SPAN_ID_HEADER, TRACE_ID_HEADER};
use crate::rpc::transport::Transport;
use crate::rpc::{Payload, Reply, RpcRequest};

const CONTENT_TYPE: &str = "content-type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Request counter outcome labels.
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
/// Error counter reason for failed handler invocations.
pub const REASON_HANDLER_ERROR: &str = "handler_error";

/// Request facts captured once at middleware entry.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub method: Method,
    pub operation: String,
    pub endpoint: String,
    pub client_ip: String,
    pub headers: HeaderMap,
}

impl RequestMetadata {
    pub fn capture(transport: &Transport) -> Self {
        Self {
            method: transport.method().clone(),
            operation: transport.operation().to_string(),
            endpoint: transport.endpoint().to_string(),
            client_ip: trace::client_ip(transport.request_header()),
            headers: transport.request_header().clone(),
        }
    }
}

struct Shared {
    max_body_bytes: usize,
    redacted_headers: Vec<String>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

/// Layer adding tracing, logging and (optionally) metrics around a handler.
#[derive(Clone)]
pub struct TracerLayer {
    shared: Arc<Shared>,
}

impl TracerLayer {
    /// Logging and tracing only, default limits.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                max_body_bytes: DEFAULT_MAX_BODY_BYTES,
                redacted_headers: DEFAULT_REDACTED_HEADERS.iter().map(|s| s.to_string()).collect(),
                metrics: None,
            }),
        }
    }

    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::new()
            .with_max_body_bytes(config.max_log_body_bytes)
            .with_redacted_headers(config.redacted_headers.clone())
    }

    /// Record metrics into `sink` as well.
    pub fn with_metrics(self, sink: Arc<dyn MetricsSink>) -> Self {
        self.map_shared(|s| s.metrics = Some(sink))
    }

    pub fn with_max_body_bytes(self, max: usize) -> Self {
        self.map_shared(|s| s.max_body_bytes = max)
    }

    pub fn with_redacted_headers(self, headers: Vec<String>) -> Self {
        self.map_shared(|s| s.redacted_headers = headers)
    }

    fn map_shared(self, f: impl FnOnce(&mut Shared)) -> Self {
        let mut shared = Shared {
            max_body_bytes: self.shared.max_body_bytes,
            redacted_headers: self.shared.redacted_headers.clone(),
            metrics: self.shared.metrics.clone(),
        };
        f(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }
}

impl Default for TracerLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for TracerLayer {
    type Service = TracerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracerService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

/// Service produced by [`TracerLayer`].
#[derive(Clone)]
pub struct TracerService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> Service<RpcRequest> for TracerService<S>
where
    S: Service<RpcRequest, Response = Reply, Error = ServiceError> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Reply;
    type Error = ServiceError;
    type Future = BoxFuture<'static, Result<Reply, ServiceError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RpcRequest) -> Self::Future {
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let shared = self.shared.clone();
        Box::pin(observe(shared, inner, req))
    }
}

async fn observe<S>(
    shared: Arc<Shared>,
    mut inner: S,
    req: RpcRequest,
) -> Result<Reply, ServiceError>
where
    S: Service<RpcRequest, Response = Reply, Error = ServiceError>,
{
    let RpcRequest { ctx, body: request } = req;

    if let Some(err) = ctx.err() {
        return Err(err);
    }

    let Some(transport) = ctx.transport().cloned() else {
        tracing::warn!("No transport in context, proceeding without tracing");
        return inner.call(RpcRequest { ctx, body: request }).await;
    };

    let ctx = trace::extract(ctx, transport.request_header());
    let identity = trace::identity(&ctx);
    let meta = RequestMetadata::capture(&transport);
    let method = meta.method.as_str();

    let mut annotation = HeaderAnnotation {
        transport: transport.clone(),
        identity: identity.clone(),
        structured_reply: false,
    };

    tracing::info!(
        api = %meta.operation,
        endpoint = %meta.endpoint,
        client_ip = %meta.client_ip,
        headers = %body::loggable_headers(&meta.headers, &shared.redacted_headers),
        body = %body::to_loggable_string(&*request, shared.max_body_bytes),
        "request received"
    );

    let _inflight = shared
        .metrics
        .as_ref()
        .map(|sink| InflightGuard::enter(sink.clone(), &meta.operation));
    if let Some(sink) = &shared.metrics {
        if let Some(size) = body::wire_size(&*request) {
            sink.observe_request_size(method, &meta.operation, size);
        }
    }

    let span = tracing::info_span!(
        "rpc.server",
        operation = %meta.operation,
        trace_id = %identity.trace_id,
        span_id = %identity.span_id,
    );

    let start = Instant::now();
    let result = inner
        .call(RpcRequest { ctx, body: request })
        .instrument(span)
        .await;
    let duration = start.elapsed();

    let reply: Option<&dyn Payload> = result.as_ref().ok().map(|r| &**r);
    annotation.structured_reply = reply.is_some_and(|r| r.as_message().is_some());

    let reply_body = body::optional_to_loggable_string(reply, shared.max_body_bytes);
    let reply_headers =
        body::loggable_headers(&transport.reply_header_snapshot(), &shared.redacted_headers);
    match &result {
        Ok(_) => tracing::info!(
            api = %meta.operation,
            endpoint = %meta.endpoint,
            duration = ?duration,
            error = "none",
            headers = %reply_headers,
            body = %reply_body,
            "request completed"
        ),
        Err(e) => tracing::error!(
            api = %meta.operation,
            endpoint = %meta.endpoint,
            duration = ?duration,
            error = %e,
            headers = %reply_headers,
            body = %reply_body,
            "request completed"
        ),
    }

    drop(annotation);

    if let Some(sink) = &shared.metrics {
        sink.observe_duration(method, &meta.operation, duration);
        let status = if result.is_ok() { STATUS_SUCCESS } else { STATUS_ERROR };
        sink.inc_requests(method, &meta.operation, status);
        if let Some(size) = reply.and_then(|r| body::wire_size(r)) {
            sink.observe_response_size(method, &meta.operation, size);
        }
        if result.is_err() {
            sink.inc_errors(method, &meta.operation, REASON_HANDLER_ERROR);
        }
    }

    result
}

/// Writes `Trace-Id`, `Span-Id` and, for structured replies, `Content-Type`
/// onto the reply headers when dropped, whichever way the request ends.
struct HeaderAnnotation {
    transport: Arc<Transport>,
    identity: TraceIdentity,
    structured_reply: bool,
}

impl Drop for HeaderAnnotation {
    fn drop(&mut self) {
        self.transport.set_reply_header(TRACE_ID_HEADER, &self.identity.trace_id);
        self.transport.set_reply_header(SPAN_ID_HEADER, &self.identity.span_id);
        if self.structured_reply {
            self.transport.set_reply_header(CONTENT_TYPE, JSON_CONTENT_TYPE);
        }
    }
}

/// Holds one in-flight slot for an operation; released on drop.
struct InflightGuard {
    sink: Arc<dyn MetricsSink>,
    operation: String,
}

impl InflightGuard {
    fn enter(sink: Arc<dyn MetricsSink>, operation: &str) -> Self {
        sink.inflight_inc(operation);
        Self {
            sink,
            operation: operation.to_string(),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.sink.inflight_dec(&self.operation);
    }
}
