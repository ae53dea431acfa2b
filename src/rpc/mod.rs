//! RPC call model shared by the pipeline and the transports.
//!
//! # Data Flow
//! ```text
//! transport adapter
//!     → context.rs (ExecutionContext: cancellation, deadline, trace, transport)
//!     → payload.rs (request body as Box<dyn Payload>)
//!     → RpcRequest → middleware stack → handler → Reply
//! ```

pub mod context;
pub mod payload;
pub mod transport;

pub use context::{Cancellation, ExecutionContext};
pub use payload::{Payload, Structured, WireMessage};
pub use transport::{Transport, TransportKind};

/// Handler output travelling back through the middleware stack.
pub type Reply = Box<dyn Payload>;

/// A single inbound call as seen by middleware and handlers.
#[derive(Debug)]
pub struct RpcRequest {
    pub ctx: ExecutionContext,
    pub body: Box<dyn Payload>,
}

impl RpcRequest {
    pub fn new(ctx: ExecutionContext, body: impl Payload) -> Self {
        Self {
            ctx,
            body: Box::new(body),
        }
    }
}
