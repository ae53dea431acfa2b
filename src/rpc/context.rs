//! Per-request execution context.
//!
//! Created by the transport adapter for each inbound call and passed by value
//! through the middleware chain into the handler. Cloning is cheap: the
//! cancellation signal and the transport are shared, the rest is small.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ServiceError;
use crate::observability::trace::SpanContext;
use crate::rpc::transport::Transport;

/// Cooperative cancellation signal shared by every clone of a context.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Ambient carrier for cancellation, deadline, trace metadata and transport.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    cancellation: Cancellation,
    deadline: Option<Instant>,
    span: Option<SpanContext>,
    baggage: Arc<BTreeMap<String, String>>,
    transport: Option<Arc<Transport>>,
}

impl ExecutionContext {
    /// A context with no deadline, no trace, and no transport.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Set an absolute deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_transport(mut self, transport: Arc<Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bind a span context. A valid span that is already bound is kept.
    pub fn with_span_context(mut self, span: SpanContext) -> Self {
        if !self.has_valid_span() {
            self.span = Some(span);
        }
        self
    }

    /// Bind baggage entries if none are bound yet.
    pub fn with_baggage(mut self, baggage: BTreeMap<String, String>) -> Self {
        if self.baggage.is_empty() {
            self.baggage = Arc::new(baggage);
        }
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn has_valid_span(&self) -> bool {
        self.span.as_ref().is_some_and(SpanContext::is_valid)
    }

    pub fn baggage(&self) -> &BTreeMap<String, String> {
        &self.baggage
    }

    pub fn transport(&self) -> Option<&Arc<Transport>> {
        self.transport.as_ref()
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<ServiceError> {
        if self.cancellation.is_cancelled() {
            return Some(ServiceError::cancelled());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ServiceError::deadline_exceeded()),
            _ => None,
        }
    }

    /// Resolve when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ServiceError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => ServiceError::cancelled(),
                    _ = tokio::time::sleep_until(deadline) => ServiceError::deadline_exceeded(),
                }
            }
            None => {
                self.cancellation.cancelled().await;
                ServiceError::cancelled()
            }
        }
    }
}
