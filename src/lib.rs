//! RPC server pipeline
//!
//! Request-level observability and uniform response encoding for RPC
//! operations served over HTTP.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ http::adapter ──▶ observability::middleware ──▶ handler
//!                         │                                 │ trace bind, logs,
//!                         │ no route / method               │ metrics, Trace-Id / Span-Id
//!                         ▼                                 ▼
//!                     http::fallback                    encoding (resolver + envelope)
//!     Client Response ◀───────────────────────────────────────┘
//!
//!     Cross-cutting: config, error, lifecycle, rpc (context, payload, transport)
//! ```

// Core subsystems
pub mod config;
pub mod encoding;
pub mod error;
pub mod http;
pub mod rpc;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::PipelineConfig;
pub use error::ServiceError;
pub use http::HttpService;
pub use lifecycle::Shutdown;
