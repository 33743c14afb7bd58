//! Dockhand Orchestrator
//!
//! Workflow engine behind Dockhand's tool-calling server. Given a tool call,
//! it works out which pipeline steps the session is still missing, runs the
//! tools that provide them in dependency order, and then runs the requested
//! tool, recording progress in the session as it goes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Calling agent / transport                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               │ RouteRequest { tool, params, session }
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ToolRouter (router)                         │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │  Graph        │ requires/provides, resolution order      │   │
//! │  │  Sessions     │ TTL + capacity bounded, merge on update  │   │
//! │  │  Locks        │ per-resource FIFO mutex with timeouts    │   │
//! │  │  Suggester    │ optional fill-in of missing parameters   │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                               │                                  │
//! │                               ▼                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │  Tools        │ async Tool trait, looked up by name      │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! 1. **Injected, not global:** the graph, registry and store are built by
//!    the embedding server and handed to [`ToolRouter::builder`].
//!
//! 2. **Errors are values:** tools return [`ToolOutcome`], routes return
//!    [`RouteResult`]; panics inside tools are caught.
//!
//! 3. **Progress survives failure:** every prerequisite that succeeded is in
//!    the session even when a later one fails.

pub mod clock;
pub mod config;
pub mod context;
pub mod graph;
pub mod locks;
pub mod pipeline;
pub mod router;
pub mod session;
pub mod suggest;
pub mod tools;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockConfig, OrchestratorConfig, RouterConfig, SessionConfig};
pub use context::{CancellationToken, ToolContext};
pub use graph::{AutofixRule, DependencyGraph, GraphError, PlannedStep, Step, ToolEdge};
pub use locks::{KeyedMutex, LockError, LockGuard, LockStatus, ResourceKey};
pub use router::{RouteError, RouteRequest, RouteResult, ToolRouter};
pub use session::{Session, SessionError, SessionId, SessionStore, SessionSummary, SessionUpdate};
pub use suggest::{ParameterSuggester, SuggestError, Suggestion, SuggestionRequest};
pub use tools::{InputShape, ShapeIssue, Tool, ToolFailure, ToolOutcome, ToolRegistry};
