//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use rpc_pipeline::rpc::ExecutionContext;
use rpc_pipeline::{HttpService, PipelineConfig, ServiceError, Shutdown};

pub const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
pub const SPAN_ID: &str = "00f067aa0ba902b7";

pub fn traceparent() -> String {
    format!("00-{TRACE_ID}-{SPAN_ID}-01")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

pub async fn say_hello(
    _ctx: ExecutionContext,
    req: HelloRequest,
) -> Result<HelloReply, ServiceError> {
    if req.name.is_empty() {
        return Err(ServiceError::new(40001, "NAME_REQUIRED", "name must not be empty"));
    }
    Ok(HelloReply {
        message: format!("hello {}", req.name),
    })
}

/// Config with the Prometheus exporter off.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.observability.metrics_enabled = false;
    config
}

pub fn json_request(method: Method, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Drive `router` in-process with a single request.
pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    TestResponse {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

/// Serve `service` on an ephemeral port.
pub async fn start_server(service: HttpService) -> (SocketAddr, Arc<Shutdown>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());
    let rx = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        service.run(listener, rx).await.unwrap();
    });
    (addr, shutdown, handle)
}
