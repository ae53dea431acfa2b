//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, catch-panic)
//!     → matched route? ── no ──→ fallback.rs (404 / 405, code-only envelope)
//!     → adapter.rs (decode body, build Transport + ExecutionContext)
//!     → TracerLayer → operation handler
//!     → ResponseEncoder (envelope, status 200) + reply headers
//!     → Send to client
//! ```

pub mod adapter;
pub mod fallback;
pub mod server;

pub use adapter::REASON_SERVER_ERROR;
pub use fallback::{RouteFallbacks, REASON_METHOD_NOT_ALLOWED, REASON_NOT_FOUND};
pub use server::{HttpService, HttpServiceBuilder, RouteError};
