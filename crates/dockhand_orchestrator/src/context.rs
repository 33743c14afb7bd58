//! Per-invocation context handed to tools

use crate::session::{SessionId, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Span;

/// Token for cooperative cancellation of a route call.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// What a tool sees of the route call driving it
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: SessionId,

    /// Handle to the shared session store
    pub sessions: SessionStore,

    /// Checked by long-running tools between units of work
    pub cancel: CancellationToken,

    /// Span covering this invocation
    pub span: Span,
}

impl ToolContext {
    pub fn new(session_id: SessionId, sessions: SessionStore, cancel: CancellationToken) -> Self {
        Self {
            session_id,
            sessions,
            cancel,
            span: Span::current(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
