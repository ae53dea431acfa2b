//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → trace.rs (bind W3C trace context, client IP)
//!     → middleware.rs (request log, handler call, response log,
//!                      Trace-Id / Span-Id headers, metrics)
//!         → body.rs (bounded, redacted renderings for logs)
//!         → metrics.rs (counters, gauges, histograms)
//!
//! Process-wide:
//!     → logging.rs (subscriber setup)
//!     → metrics.rs (Prometheus exporter setup)
//! ```
//!
//! # Design Decisions
//! - Nothing in this subsystem may fail a request
//! - Logger and metrics sink are injected, never looked up per request
//! - Tracing absence is a normal state reported as `none`

pub mod body;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod trace;

pub use metrics::{MemorySink, MetricsSink, NoopSink, PrometheusSink, Summary};
pub use middleware::{TracerLayer, TracerService};
pub use trace::TraceIdentity;
