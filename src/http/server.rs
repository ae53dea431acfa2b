//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Register RPC operations as `(method, path)` routes
//! - Wire the observability layer, encoder and fallbacks into one Axum router
//! - Convert handler panics into the fallback envelope
//! - Serve with graceful shutdown

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;

use crate::config::schema::PipelineConfig;
use crate::encoding::codec::{Codec, CodecRegistry};
use crate::encoding::envelope::{EncodedResponse, ResponseEncoder};
use crate::encoding::resolver::ErrorCodeResolver;
use crate::error::ServiceError;
use crate::http::adapter::{panic_message, Dispatcher, Route};
use crate::http::fallback::RouteFallbacks;
use crate::observability::metrics::MetricsSink;
use crate::observability::middleware::TracerLayer;
use crate::rpc::ExecutionContext;

/// Route registration failures.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route path {path}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("route path {path} rejected")]
    Rejected {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("unsupported method {method} for {path}")]
    UnsupportedMethod { method: Method, path: String },
}

struct Registration {
    method: Method,
    path: String,
    route: Route,
}

/// Builder for [`HttpService`].
pub struct HttpServiceBuilder {
    config: PipelineConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    resolver: ErrorCodeResolver,
    codecs: CodecRegistry,
    routes: Vec<Registration>,
}

impl HttpServiceBuilder {
    /// Record per-request metrics into `sink`.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Map errors to envelope codes with `mapper` instead of the default rule.
    pub fn error_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&ServiceError) -> i32 + Send + Sync + 'static,
    {
        self.resolver = self.resolver.with_mapper(mapper);
        self
    }

    /// Make `codec` available for `Accept` negotiation.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codecs = self.codecs.register(codec);
        self
    }

    /// Bind `handler` to `method path` under the name `operation`.
    ///
    /// Registering the same method and path twice keeps the last handler.
    pub fn route<Req, Resp, F, Fut>(
        mut self,
        method: Method,
        path: &str,
        operation: &str,
        handler: F,
    ) -> Self
    where
        Req: DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
        Resp: Serialize + fmt::Debug + Send + Sync + 'static,
        F: Fn(ExecutionContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, ServiceError>> + Send + 'static,
    {
        self.routes.retain(|r| !(r.method == method && r.path == path));
        self.routes.push(Registration {
            method,
            path: path.to_string(),
            route: Route::new(operation, handler),
        });
        self
    }

    pub fn build(self) -> Result<HttpService, RouteError> {
        let obs = &self.config.observability;
        let mut tracer = TracerLayer::from_config(obs);
        if let Some(sink) = &self.metrics {
            tracer = tracer.with_metrics(sink.clone());
        }

        let dispatcher = Arc::new(Dispatcher {
            encoder: ResponseEncoder::new(&self.config.responses)
                .with_resolver(self.resolver)
                .with_codecs(self.codecs),
            tracer,
            metrics: self.metrics.clone(),
            endpoint: self.config.server.endpoint(),
            timeout: Duration::from_secs(self.config.server.request_timeout_secs),
            max_body_bytes: self.config.server.max_body_bytes,
        });
        let fallbacks = RouteFallbacks::new(&self.config.responses, self.metrics.clone());

        let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
        let mut paths = matchit::Router::new();
        for Registration { method, path, route } in self.routes {
            let filter = MethodFilter::try_from(method.clone()).map_err(|_| {
                RouteError::UnsupportedMethod {
                    method: method.clone(),
                    path: path.clone(),
                }
            })?;
            if !by_path.contains_key(&path) {
                check_path(&mut paths, &path)?;
            }

            tracing::debug!(
                method = %method,
                path = %path,
                operation = %route.operation,
                "Registering route"
            );

            let route = Arc::new(route);
            let dispatcher = dispatcher.clone();
            let handler = move |request: Request<Body>| {
                let dispatcher = dispatcher.clone();
                let route = route.clone();
                async move { dispatcher.dispatch(&route, request).await }
            };

            let method_router = match by_path.remove(&path) {
                Some(existing) => existing.on(filter, handler),
                None => method_not_allowed(fallbacks.clone()).on(filter, handler),
            };
            by_path.insert(path, method_router);
        }

        let mut router = Router::new();
        for (path, method_router) in by_path {
            router = router.route(&path, method_router);
        }
        let not_found = fallbacks.clone();
        let router = router
            .fallback(move |method: Method, uri: Uri| {
                let fallbacks = not_found.clone();
                async move { fallbacks.not_found(&method, uri.path()) }
            })
            .layer(CatchPanicLayer::custom(panic_response));

        Ok(HttpService {
            router,
            config: self.config,
        })
    }
}

fn method_not_allowed(fallbacks: RouteFallbacks) -> MethodRouter {
    MethodRouter::new().fallback(move |method: Method, uri: Uri| {
        let fallbacks = fallbacks.clone();
        async move { fallbacks.method_not_allowed(&method, uri.path()) }
    })
}

/// Reject paths Axum would panic on: relative paths, `:param`/`*rest`
/// segments and paths that conflict with one already registered.
fn check_path(paths: &mut matchit::Router<()>, path: &str) -> Result<(), RouteError> {
    let invalid = |reason: &'static str| RouteError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path.split('/').any(|seg| seg.starts_with(':') || seg.starts_with('*')) {
        return Err(invalid("segments must not start with ':' or '*', use {param}"));
    }
    paths
        .insert(path, ())
        .map_err(|source| RouteError::Rejected {
            path: path.to_string(),
            source,
        })
}

// Outer backstop. Handler panics are normally caught by `Operation`.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(&*err), "Handler panicked");
    EncodedResponse::fallback().into_response()
}

/// RPC operations served over HTTP.
pub struct HttpService {
    router: Router,
    config: PipelineConfig,
}

impl HttpService {
    pub fn builder(config: PipelineConfig) -> HttpServiceBuilder {
        let resolver = ErrorCodeResolver::new(config.responses.fallback_error_code);
        HttpServiceBuilder {
            config,
            metrics: None,
            resolver,
            codecs: CodecRegistry::new(),
            routes: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The Axum router, for embedding or in-process testing.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            endpoint = %self.config.server.endpoint(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
