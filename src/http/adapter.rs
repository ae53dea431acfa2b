//! Bridges axum requests onto the RPC pipeline.
//!
//! # Responsibilities
//! - Buffer and decode the request body (JSON, or the query string when empty)
//! - Build the `Transport` and `ExecutionContext` for the call
//! - Run the operation through the middleware stack
//! - Encode the reply or error and copy middleware reply headers

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::Query;
use axum::http::{header, HeaderMap, Method, Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::{Layer, Service, ServiceExt};

use crate::encoding::envelope::{EncodedResponse, ResponseEncoder};
use crate::error::ServiceError;
use crate::observability::metrics::MetricsSink;
use crate::observability::middleware::TracerLayer;
use crate::rpc::{
    Cancellation, ExecutionContext, Payload, Reply, RpcRequest, Structured, Transport,
    TransportKind,
};

/// Error counter reason for requests that end on the error encoder.
pub const REASON_SERVER_ERROR: &str = "server_error";
/// Error reason for a handler that panicked.
pub const REASON_PANIC: &str = "PANIC";

type HandlerFuture = BoxFuture<'static, Result<Reply, ServiceError>>;
type Invoke = Arc<dyn Fn(ExecutionContext, Box<dyn Payload>) -> HandlerFuture + Send + Sync>;
type Decode = fn(&Uri, Bytes) -> Result<Box<dyn Payload>, ServiceError>;

/// Type-erased operation handler. The innermost service of every call.
///
/// A panicking handler is turned into an internal error here, so the
/// middleware above still logs, counts and annotates the call.
#[derive(Clone)]
pub struct Operation {
    invoke: Invoke,
}

impl Operation {
    pub fn new<Req, Resp, F, Fut>(handler: F) -> Self
    where
        Req: Serialize + fmt::Debug + Send + Sync + 'static,
        Resp: Serialize + fmt::Debug + Send + Sync + 'static,
        F: Fn(ExecutionContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: Invoke = Arc::new(move |ctx, body: Box<dyn Payload>| -> HandlerFuture {
            let handler = handler.clone();
            let call = async move {
                let req = body.downcast::<Structured<Req>>().map_err(|_| {
                    ServiceError::internal(
                        "UNEXPECTED_REQUEST",
                        "request payload has an unexpected type",
                    )
                })?;
                let resp = handler(ctx, req.into_inner()).await?;
                Ok(Box::new(Structured(resp)) as Reply)
            };
            Box::pin(async move {
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        tracing::error!(panic = %panic_message(&*panic), "Handler panicked");
                        Err(ServiceError::internal(REASON_PANIC, "handler panicked"))
                    }
                }
            })
        });
        Self { invoke }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    }
}

impl Service<RpcRequest> for Operation {
    type Response = Reply;
    type Error = ServiceError;
    type Future = BoxFuture<'static, Result<Reply, ServiceError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RpcRequest) -> Self::Future {
        (self.invoke)(req.ctx, req.body)
    }
}

/// A registered `(method, path)` binding.
pub struct Route {
    pub operation: String,
    decode: Decode,
    service: Operation,
}

impl Route {
    pub fn new<Req, Resp, F, Fut>(operation: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
        Resp: Serialize + fmt::Debug + Send + Sync + 'static,
        F: Fn(ExecutionContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
    {
        Self {
            operation: operation.into(),
            decode: decode_request::<Req>,
            service: Operation::new(handler),
        }
    }
}

/// Decode a JSON body, or the query string when the body is empty.
fn decode_request<Req>(uri: &Uri, body: Bytes) -> Result<Box<dyn Payload>, ServiceError>
where
    Req: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
{
    let req: Req = if body.iter().all(u8::is_ascii_whitespace) {
        Query::<Req>::try_from_uri(uri)
            .map_err(|e| ServiceError::bad_request("INVALID_QUERY", e.body_text()))?
            .0
    } else {
        serde_json::from_slice(&body)?
    };
    Ok(Box::new(Structured(req)))
}

/// State shared by every route of one service.
pub struct Dispatcher {
    pub(crate) encoder: ResponseEncoder,
    pub(crate) tracer: TracerLayer,
    pub(crate) metrics: Option<Arc<dyn MetricsSink>>,
    pub(crate) endpoint: String,
    pub(crate) timeout: Duration,
    pub(crate) max_body_bytes: usize,
}

impl Dispatcher {
    pub async fn dispatch(&self, route: &Route, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();

        let reject = |err: ServiceError| {
            self.encode_error(&parts.method, &path, &parts.headers, &err)
                .into_response()
        };
        let bytes = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => return reject(ServiceError::bad_request("INVALID_BODY", e.to_string())),
        };
        let payload = match (route.decode)(&parts.uri, bytes) {
            Ok(payload) => payload,
            Err(err) => return reject(err),
        };

        let transport = Arc::new(Transport::new(
            TransportKind::Http,
            self.endpoint.clone(),
            route.operation.clone(),
            parts.method.clone(),
            path.clone(),
            parts.headers.clone(),
        ));
        let cancellation = Cancellation::new();
        let _cancel_on_drop = CancelOnDrop(cancellation.clone());
        let ctx = ExecutionContext::new()
            .with_cancellation(cancellation)
            .with_timeout(self.timeout)
            .with_transport(transport.clone());

        let service = self.tracer.layer(route.service.clone());
        let result = service.oneshot(RpcRequest { ctx, body: payload }).await;

        let encoded = match &result {
            Ok(reply) => self.encoder.encode_success(&parts.headers, &**reply),
            Err(err) => self.encode_error(&parts.method, &path, &parts.headers, err),
        };
        let content_type = encoded.content_type.clone();
        let mut response = encoded.into_response();
        response.headers_mut().extend(transport.reply_header_snapshot());
        // The negotiated codec decides the body's content type.
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        response
    }

    fn encode_error(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        err: &ServiceError,
    ) -> EncodedResponse {
        if let Some(sink) = &self.metrics {
            sink.inc_errors(method.as_str(), path, REASON_SERVER_ERROR);
        }
        self.encoder.encode_error(headers, err)
    }
}

/// Cancels the call's context once the server stops waiting on it.
struct CancelOnDrop(Cancellation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
