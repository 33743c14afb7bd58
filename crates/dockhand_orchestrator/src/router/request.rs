//! Route request and result types

use super::RouteError;
use crate::context::CancellationToken;
use crate::session::{Session, SessionId};
use serde_json::{json, Value};

/// One call into the router
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub tool_name: String,
    pub params: Value,

    /// Session to run in; a new one is created when absent or unknown
    pub session_id: Option<SessionId>,

    /// Skip the idempotency check and prerequisite resolution
    pub force: bool,

    pub cancel: CancellationToken,
}

impl RouteRequest {
    pub fn new(tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            params,
            session_id: None,
            force: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn session(mut self, id: impl Into<SessionId>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of a route call
#[derive(Debug)]
pub struct RouteResult {
    pub result: Result<Value, RouteError>,

    /// Tools invoked, correctives first and the requested tool last
    pub executed_tools: Vec<String>,

    /// Session after the call; `None` if no session could be resolved
    pub session: Option<Session>,
}

impl RouteResult {
    pub(crate) fn failed(error: RouteError, executed_tools: Vec<String>, session: Option<Session>) -> Self {
        Self {
            result: Err(error),
            executed_tools,
            session,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.session_id)
    }

    /// True when the requested tool was skipped as already satisfied
    pub fn was_skipped(&self) -> bool {
        matches!(&self.result, Ok(value) if value.get("skipped") == Some(&Value::Bool(true)))
    }

    /// JSON view for transports
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "success": self.is_success(),
            "executed_tools": self.executed_tools,
        });
        match &self.result {
            Ok(result) => value["result"] = result.clone(),
            Err(error) => value["error"] = error.to_json(),
        }
        if let Some(session) = &self.session {
            value["session_id"] = json!(session.session_id);
            value["completed_steps"] = json!(session.completed_steps);
        }
        value
    }
}
