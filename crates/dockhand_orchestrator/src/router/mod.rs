//! Tool Router - Prerequisite-Aware Tool Dispatch
//!
//! For each call the router:
//! 1. Resolves (or creates) the session
//! 2. Skips the tool when everything it provides is already completed
//! 3. Runs the providers of any missing prerequisite steps, in dependency
//!    order, persisting progress after each one
//! 4. Completes parameters (defaults, session id, optional suggestions)
//! 5. Runs the requested tool, under its resource lock when it declares one
//!
//! Nothing here is persisted between calls except through the session store.
//!
//! # Failure Model
//!
//! Every failure is returned as a [`RouteError`] inside the [`RouteResult`].
//! A failed prerequisite still leaves every earlier step recorded in the
//! session. A panic anywhere in the sequence (a tool, an autofix rule, the
//! suggester) is caught and reported as [`RouteError::Internal`] together
//! with the last session state that was stored.

mod error;
mod params;
mod request;

pub use error::RouteError;
pub use params::normalize_params;
pub use request::{RouteRequest, RouteResult};

use crate::config::OrchestratorConfig;
use crate::context::{CancellationToken, ToolContext};
use crate::graph::{DependencyGraph, PlannedStep, Step, ToolEdge};
use crate::locks::{KeyedMutex, LockGuard};
use crate::session::{Session, SessionError, SessionId, SessionStore, SessionUpdate, SweeperHandle};
use crate::suggest::{merge_suggestions, ParameterSuggester, SuggestionRequest};
use crate::tools::{Tool, ToolOutcome, ToolRegistry};
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Result returned for a tool whose effects are already in the session
pub const SKIPPED_REASON: &str = "Effects already satisfied";

/// Orchestrates graph, session store, keyed mutex and tools
#[derive(Clone)]
pub struct ToolRouter {
    graph: Arc<DependencyGraph>,
    registry: Arc<ToolRegistry>,
    sessions: SessionStore,
    locks: KeyedMutex,
    suggester: Option<Arc<dyn ParameterSuggester>>,
    config: OrchestratorConfig,
}

impl ToolRouter {
    pub fn builder() -> ToolRouterBuilder {
        ToolRouterBuilder::default()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn locks(&self) -> &KeyedMutex {
        &self.locks
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start the background session sweeper at the configured interval
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        self.sessions
            .spawn_sweeper(self.config.sessions.sweep_interval())
    }

    /// Correctives the router would run for `tool_name` given `completed`
    pub fn plan(&self, tool_name: &str, completed: &BTreeSet<Step>) -> Result<Vec<PlannedStep>, RouteError> {
        let missing = self.graph.missing_preconditions(tool_name, completed);
        Ok(self.graph.resolution_order(&missing, completed)?)
    }

    /// Route one tool call
    pub async fn route(&self, request: RouteRequest) -> RouteResult {
        let span = info_span!(
            "route",
            tool = %request.tool_name,
            session = tracing::field::Empty
        );
        let mut progress = Progress::default();
        let outcome = AssertUnwindSafe(self.route_inner(request, &mut progress).instrument(span))
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload);
                error!("Route panicked: {}", message);
                let session = progress
                    .session_id
                    .and_then(|id| self.sessions.get(&id).or(progress.opened));
                RouteResult::failed(
                    RouteError::Internal(format!("Route panicked: {}", message)),
                    progress.trail,
                    session,
                )
            }
        }
    }

    async fn route_inner(&self, request: RouteRequest, progress: &mut Progress) -> RouteResult {
        let RouteRequest {
            tool_name,
            params: caller_params,
            session_id,
            force,
            cancel,
        } = request;
        let Progress {
            trail,
            session_id: seen_id,
            opened,
        } = progress;

        let Some(tool) = self.registry.get(&tool_name) else {
            warn!("Unknown tool: {}", tool_name);
            return RouteResult::failed(RouteError::ToolNotFound(tool_name), Vec::new(), None);
        };

        let mut snapshot = match self.resolve_session(session_id) {
            Ok(session) => session,
            Err(e) => return RouteResult::failed(e.into(), Vec::new(), None),
        };
        let id = snapshot.session_id.clone();
        *seen_id = Some(id.clone());
        *opened = Some(snapshot.clone());
        Span::current().record("session", tracing::field::display(&id));

        // Dependency-free tools run as called
        let Some(edge) = self.graph.edge_of(&tool_name) else {
            debug!("{} has no dependency edge; running directly", tool_name);
            let result = self
                .run(&tool, caller_params, &id, &cancel, trail)
                .await;
            if let Ok(value) = &result {
                snapshot = self.persist(
                    &id,
                    SessionUpdate::new().result(&tool_name, value.clone()),
                    snapshot,
                );
            }
            return RouteResult {
                result,
                executed_tools: std::mem::take(trail),
                session: Some(snapshot),
            };
        };

        if !force && edge.is_satisfied_by(&snapshot.completed_steps) {
            info!("Skipping {}: {}", tool_name, SKIPPED_REASON.to_lowercase());
            return RouteResult {
                result: Ok(json!({ "skipped": true, "reason": SKIPPED_REASON })),
                executed_tools: std::mem::take(trail),
                session: Some(snapshot),
            };
        }

        let normalized = normalize_params(
            caller_params.clone(),
            &id,
            &self.config.router.default_path,
        );

        if !force {
            let missing = self
                .graph
                .missing_preconditions(&tool_name, &snapshot.completed_steps);
            if !missing.is_empty() {
                match self
                    .run_correctives(&tool_name, &missing, &caller_params, &normalized, &id, &cancel, trail, snapshot)
                    .await
                {
                    Ok(session) => snapshot = session,
                    Err((error, session)) => {
                        return RouteResult::failed(error, std::mem::take(trail), Some(session));
                    }
                }
            }
        } else {
            debug!("Forced call to {}; skipping prerequisite checks", tool_name);
        }

        let mut params = normalized;
        if let Some(suggester) = &self.suggester {
            self.complete_params(suggester.as_ref(), tool.as_ref(), &mut params, &snapshot)
                .await;
        }

        let result = self.run(&tool, params, &id, &cancel, trail).await;
        if let Ok(value) = &result {
            snapshot = self.persist(
                &id,
                SessionUpdate::new()
                    .result(&tool_name, value.clone())
                    .complete_all(edge.provided_steps().iter().cloned())
                    .current_step(&tool_name),
                snapshot,
            );
            info!(
                "Completed {} ({} tools run)",
                tool_name,
                trail.len()
            );
        }

        RouteResult {
            result,
            executed_tools: std::mem::take(trail),
            session: Some(snapshot),
        }
    }

    /// Run the providers of `missing` in resolved order.
    ///
    /// On failure the error is returned with the session as persisted after
    /// recording every step completed before the failure.
    #[allow(clippy::too_many_arguments)]
    async fn run_correctives(
        &self,
        tool_name: &str,
        missing: &[Step],
        caller_params: &Value,
        normalized: &Value,
        id: &SessionId,
        cancel: &CancellationToken,
        trail: &mut Vec<String>,
        mut snapshot: Session,
    ) -> Result<Session, (RouteError, Session)> {
        let plan = match self
            .graph
            .resolution_order(missing, &snapshot.completed_steps)
        {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Cannot resolve prerequisites of {}: {}", tool_name, e);
                return Err((RouteError::Dependency(e), snapshot));
            }
        };
        info!(
            "{} is missing {} step(s); running {} prerequisite tool(s)",
            tool_name,
            missing.len(),
            plan.len()
        );

        let mut completed = snapshot.completed_steps.clone();
        for PlannedStep { tool: corrective, step } in plan {
            if completed.contains(&step) {
                debug!("Step {} already completed; skipping {}", step, corrective);
                continue;
            }

            let params = match self
                .graph
                .autofix_for(tool_name, &step)
                .filter(|rule| rule.tool() == corrective)
            {
                Some(rule) => normalize_params(
                    rule.build_params(caller_params),
                    id,
                    &self.config.router.default_path,
                ),
                None => normalized.clone(),
            };

            let outcome = match self.registry.get(&corrective) {
                Some(tool) => self.run(&tool, params, id, cancel, trail).await,
                None => Err(RouteError::ToolNotFound(corrective.clone())),
            };

            match outcome {
                Ok(value) => {
                    let provided: Vec<Step> = self
                        .graph
                        .edge_of(&corrective)
                        .map(ToolEdge::provided_steps)
                        .unwrap_or_default()
                        .to_vec();
                    completed.insert(step.clone());
                    completed.extend(provided.iter().cloned());
                    snapshot = self.persist(
                        id,
                        SessionUpdate::new()
                            .complete(step)
                            .complete_all(provided)
                            .result(&corrective, value)
                            .current_step(&corrective),
                        snapshot,
                    );
                }
                Err(e) => {
                    snapshot = self.persist(
                        id,
                        SessionUpdate::new().complete_all(completed.iter().cloned()),
                        snapshot,
                    );
                    let error = match e {
                        RouteError::Cancelled => RouteError::Cancelled,
                        RouteError::ToolFailed {
                            message, guidance, ..
                        } => RouteError::CorrectiveFailed {
                            step,
                            tool: corrective,
                            message,
                            guidance,
                        },
                        other => RouteError::CorrectiveFailed {
                            guidance: other.guidance().map(str::to_string),
                            message: other.to_string(),
                            step,
                            tool: corrective,
                        },
                    };
                    warn!("Prerequisite chain for {} stopped: {}", tool_name, error);
                    return Err((error, snapshot));
                }
            }
        }

        snapshot = self.persist(id, SessionUpdate::new().complete_all(completed), snapshot);
        Ok(snapshot)
    }

    /// Ask the suggester for required fields the caller left out
    async fn complete_params(
        &self,
        suggester: &dyn ParameterSuggester,
        tool: &dyn Tool,
        params: &mut Value,
        session: &Session,
    ) {
        let shape = tool.input_shape();
        let missing = shape.missing_required(params);
        if missing.is_empty() {
            return;
        }
        if !suggester.is_available().await {
            debug!("Suggester unavailable; leaving {} unfilled", missing.join(", "));
            return;
        }

        let request = SuggestionRequest {
            tool_name: tool.name().to_string(),
            required_fields: shape.required_fields(),
            missing_fields: missing.clone(),
            shape: shape.schema().clone(),
            current_params: params.clone(),
            session: Some(session.clone()),
        };
        let suggestion = match suggester.suggest(request).await {
            Ok(suggestion) => suggestion,
            Err(e) => {
                warn!("Parameter suggestion failed for {}: {}", tool.name(), e);
                return;
            }
        };

        let scoped: Map<String, Value> = suggestion
            .suggestions
            .into_iter()
            .filter(|(field, _)| missing.contains(field))
            .collect();
        match suggester.validate(scoped, &shape) {
            Ok(valid) => {
                let applied = merge_suggestions(params, valid);
                if !applied.is_empty() {
                    info!(
                        "Filled {} for {} from suggestions (confidence {:.2})",
                        applied.join(", "),
                        tool.name(),
                        suggestion.confidence
                    );
                }
            }
            Err(e) => warn!("Discarded suggestions for {}: {}", tool.name(), e),
        }
    }

    /// Validate, lock if keyed, and execute one tool
    async fn run(
        &self,
        tool: &Arc<dyn Tool>,
        params: Value,
        id: &SessionId,
        cancel: &CancellationToken,
        trail: &mut Vec<String>,
    ) -> Result<Value, RouteError> {
        let name = tool.name().to_string();
        if cancel.is_cancelled() {
            info!("Route cancelled before {}", name);
            return Err(RouteError::Cancelled);
        }
        if let Err(issues) = tool.input_shape().validate(&params) {
            return Err(RouteError::InvalidParams { tool: name, issues });
        }

        let lock = match tool.resource_key(&params) {
            Some(key) => {
                let timeout = tool
                    .lock_timeout()
                    .unwrap_or_else(|| self.config.locks.timeout());
                Some(self.locks.acquire(key.as_str(), timeout).await?)
            }
            None => None,
        };

        let ctx = ToolContext::new(id.clone(), self.sessions.clone(), cancel.clone());
        let result = invoke(Arc::clone(tool), params, ctx, lock).await;
        trail.push(name);
        result
    }

    fn resolve_session(&self, session_id: Option<SessionId>) -> Result<Session, SessionError> {
        if let Some(session) = session_id.as_ref().and_then(|id| self.sessions.get(id)) {
            return Ok(session);
        }
        self.sessions.create(session_id)
    }

    /// Merge `update`; on failure keep the last good snapshot
    fn persist(&self, id: &SessionId, update: SessionUpdate, fallback: Session) -> Session {
        match self.sessions.update(id, update) {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to update session {}: {}; keeping last snapshot", id, e);
                fallback
            }
        }
    }
}

impl std::fmt::Debug for ToolRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRouter")
            .field("graph", &self.graph.len())
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("suggester", &self.suggester.is_some())
            .finish()
    }
}

/// What a route has done so far; read back when the route panics
#[derive(Default)]
struct Progress {
    trail: Vec<String>,
    session_id: Option<SessionId>,
    /// Session as resolved at the start of the route
    opened: Option<Session>,
}

/// Execute on a separate task so a panicking tool cannot take the route down.
///
/// The resource lock moves into that task and is released only when the tool
/// finishes, even if the route itself is dropped first.
async fn invoke(
    tool: Arc<dyn Tool>,
    params: Value,
    ctx: ToolContext,
    lock: Option<LockGuard>,
) -> Result<Value, RouteError> {
    let name = tool.name().to_string();
    let span = info_span!("tool", name = %name);
    let ctx = ctx.with_span(span.clone());

    let handle = tokio::spawn(
        async move {
            let _lock = lock;
            tool.execute(params, &ctx).await
        }
        .instrument(span),
    );

    match handle.await {
        Ok(ToolOutcome::Success(value)) => {
            debug!("{} succeeded", name);
            Ok(value)
        }
        Ok(ToolOutcome::Failure(failure)) => {
            warn!("{} failed: {}", name, failure.message);
            Err(RouteError::ToolFailed {
                tool: name,
                message: failure.message,
                guidance: failure.guidance,
            })
        }
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            error!("{} panicked: {}", name, message);
            Err(RouteError::Internal(format!("Tool '{}' panicked: {}", name, message)))
        }
        Err(join_error) => {
            error!("{} task did not complete: {}", name, join_error);
            Err(RouteError::Internal(format!(
                "Tool '{}' did not complete: {}",
                name, join_error
            )))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ToolRouter`]
#[derive(Default)]
pub struct ToolRouterBuilder {
    graph: Option<Arc<DependencyGraph>>,
    registry: Option<Arc<ToolRegistry>>,
    sessions: Option<SessionStore>,
    locks: Option<KeyedMutex>,
    suggester: Option<Arc<dyn ParameterSuggester>>,
    config: OrchestratorConfig,
}

impl ToolRouterBuilder {
    pub fn graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = Some(Arc::new(graph));
        self
    }

    pub fn shared_graph(mut self, graph: Arc<DependencyGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Use an existing store; otherwise one is built from the config
    pub fn sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn locks(mut self, locks: KeyedMutex) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn suggester(mut self, suggester: Arc<dyn ParameterSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ToolRouter {
        let sessions = self
            .sessions
            .unwrap_or_else(|| SessionStore::new(&self.config.sessions));
        let router = ToolRouter {
            graph: self.graph.unwrap_or_default(),
            registry: self.registry.unwrap_or_default(),
            sessions,
            locks: self.locks.unwrap_or_default(),
            suggester: self.suggester,
            config: self.config,
        };
        debug!(
            "Built router: {} tools registered, {} in dependency graph",
            router.registry.len(),
            router.graph.len()
        );
        router
    }
}
