//! Session Management Tools
//!
//! Dependency-free tools that read and manage the session store through the
//! [`ToolContext`] handle:
//! - `list_sessions`: live sessions with expiry and progress
//! - `inspect_session`: full state of one session
//! - `delete_session`: drop a session
//! - `label_session`: merge string labels into a session's metadata

use super::{InputShape, Tool, ToolOutcome, ToolRegistry};
use crate::context::ToolContext;
use crate::session::{SessionId, SessionSummary, SessionUpdate};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

pub const LIST_SESSIONS: &str = "list_sessions";
pub const INSPECT_SESSION: &str = "inspect_session";
pub const DELETE_SESSION: &str = "delete_session";
pub const LABEL_SESSION: &str = "label_session";

/// Register every session management tool
pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(ListSessionsTool));
    registry.register(Arc::new(InspectSessionTool));
    registry.register(Arc::new(DeleteSessionTool));
    registry.register(Arc::new(LabelSessionTool));
}

fn parse_args<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, ToolOutcome> {
    serde_json::from_value(params)
        .map_err(|e| ToolOutcome::failure(format!("Invalid arguments: {}", e)))
}

// =============================================================================
// list_sessions
// =============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct ListSessionsArgs {
    /// Only sessions carrying this label, as `key` or `key=value`
    #[serde(default)]
    label: Option<String>,

    /// Maximum number of sessions to return (default 100)
    #[serde(default)]
    limit: Option<usize>,

    /// `asc` (oldest first) or `desc` (newest first, default)
    #[serde(default)]
    sort_order: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListSessionsOutput {
    sessions: Vec<SessionSummary>,
    total_sessions: usize,
    active_count: usize,
    expired_count: usize,
    max_sessions: usize,
}

fn label_matches(summary: &SessionSummary, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((key, value)) => summary.labels.get(key).map(String::as_str) == Some(value),
        None => summary.labels.contains_key(filter),
    }
}

/// Lists live sessions
pub struct ListSessionsTool;

#[async_trait]
impl Tool for ListSessionsTool {
    fn name(&self) -> &str {
        LIST_SESSIONS
    }

    fn description(&self) -> &str {
        "List live sessions with their completed steps and expiry"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::of::<ListSessionsArgs>()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args: ListSessionsArgs = match parse_args(params) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };

        let mut sessions = ctx.sessions.summaries();
        if let Some(filter) = &args.label {
            sessions.retain(|s| label_matches(s, filter));
        }
        if args.sort_order.as_deref() != Some("asc") {
            sessions.reverse();
        }
        sessions.truncate(args.limit.unwrap_or(100));

        let stats = ctx.sessions.stats();
        let output = ListSessionsOutput {
            sessions,
            total_sessions: stats.total,
            active_count: stats.active,
            expired_count: stats.expired,
            max_sessions: stats.max_sessions,
        };
        match serde_json::to_value(output) {
            Ok(value) => ToolOutcome::success(value),
            Err(e) => ToolOutcome::failure(format!("Failed to encode sessions: {}", e)),
        }
    }
}

// =============================================================================
// inspect_session
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
struct InspectSessionArgs {
    /// Session to inspect; defaults to the calling session
    #[serde(default)]
    target: Option<String>,
}

/// Returns the full state of one session
pub struct InspectSessionTool;

#[async_trait]
impl Tool for InspectSessionTool {
    fn name(&self) -> &str {
        INSPECT_SESSION
    }

    fn description(&self) -> &str {
        "Show completed steps, tool results and metadata of a session"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::of::<InspectSessionArgs>()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args: InspectSessionArgs = match parse_args(params) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        let id = args
            .target
            .map(SessionId::from_string)
            .unwrap_or_else(|| ctx.session_id.clone());

        let Some(session) = ctx.sessions.get(&id) else {
            return ToolOutcome::failure_with_guidance(
                format!("Session not found: {}", id),
                "Call list_sessions to see live sessions",
            );
        };

        let expires_at = session.expires_at(ctx.sessions.ttl());
        match serde_json::to_value(&session) {
            Ok(mut value) => {
                value["expires_at"] = json!(expires_at);
                ToolOutcome::success(value)
            }
            Err(e) => ToolOutcome::failure(format!("Failed to encode session: {}", e)),
        }
    }
}

// =============================================================================
// delete_session
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteSessionArgs {
    /// Session to delete
    target: String,
}

/// Deletes a session other than the calling one
pub struct DeleteSessionTool;

#[async_trait]
impl Tool for DeleteSessionTool {
    fn name(&self) -> &str {
        DELETE_SESSION
    }

    fn description(&self) -> &str {
        "Delete a session and everything recorded in it"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::of::<DeleteSessionArgs>()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args: DeleteSessionArgs = match parse_args(params) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        let id = SessionId::from_string(args.target);

        if id == ctx.session_id {
            return ToolOutcome::failure_with_guidance(
                "Cannot delete the session driving this call",
                "Call delete_session from another session",
            );
        }

        let deleted = ctx.sessions.delete(&id);
        if deleted {
            info!("Session {} deleted by {}", id, ctx.session_id);
        }
        ToolOutcome::success(json!({ "session_id": id, "deleted": deleted }))
    }
}

// =============================================================================
// label_session
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
struct LabelSessionArgs {
    /// Labels to set, as string key/value pairs
    labels: Map<String, Value>,
}

/// Merges labels into the calling session's metadata
pub struct LabelSessionTool;

#[async_trait]
impl Tool for LabelSessionTool {
    fn name(&self) -> &str {
        LABEL_SESSION
    }

    fn description(&self) -> &str {
        "Attach key/value labels to the current session"
    }

    fn input_shape(&self) -> InputShape {
        InputShape::of::<LabelSessionArgs>()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args: LabelSessionArgs = match parse_args(params) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        if let Some((key, _)) = args.labels.iter().find(|(_, v)| !v.is_string()) {
            return ToolOutcome::failure(format!("Label '{}' must be a string", key));
        }

        let mut labels = ctx
            .sessions
            .get(&ctx.session_id)
            .and_then(|s| s.metadata.get("labels").and_then(Value::as_object).cloned())
            .unwrap_or_default();
        labels.extend(args.labels);

        let update = SessionUpdate::new().metadata("labels", Value::Object(labels.clone()));
        match ctx.sessions.update(&ctx.session_id, update) {
            Ok(_) => ToolOutcome::success(json!({ "labels": labels })),
            Err(e) => ToolOutcome::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SessionConfig;
    use crate::context::CancellationToken;
    use crate::session::SessionStore;
    use chrono::Duration;

    fn context(store: &SessionStore, id: &str) -> ToolContext {
        let session = store.create(Some(SessionId::from(id))).unwrap();
        ToolContext::new(session.session_id, store.clone(), CancellationToken::new())
    }

    fn store() -> (SessionStore, ManualClock) {
        let clock = ManualClock::default();
        let store = SessionStore::with_clock(&SessionConfig::default(), Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        let (store, clock) = store();
        let _ = context(&store, "first");
        clock.advance(Duration::seconds(1));
        let ctx = context(&store, "second");

        let out = ListSessionsTool
            .execute(json!({}), &ctx)
            .await
            .into_result()
            .unwrap();

        assert_eq!(out["total_sessions"], 2);
        assert_eq!(out["sessions"][0]["session_id"], "second");
        assert_eq!(out["sessions"][1]["session_id"], "first");
    }

    #[tokio::test]
    async fn test_list_sessions_label_filter() {
        let (store, _) = store();
        let ctx = context(&store, "labelled");
        let _ = context(&store, "plain");

        LabelSessionTool
            .execute(json!({ "labels": { "team": "platform" } }), &ctx)
            .await
            .into_result()
            .unwrap();

        let out = ListSessionsTool
            .execute(json!({ "label": "team=platform" }), &ctx)
            .await
            .into_result()
            .unwrap();
        let sessions = out["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["session_id"], "labelled");
        assert_eq!(sessions[0]["labels"]["team"], "platform");
    }

    #[tokio::test]
    async fn test_inspect_defaults_to_calling_session() {
        let (store, _) = store();
        let ctx = context(&store, "me");
        store
            .update(&ctx.session_id, SessionUpdate::new().complete("analyzed_repo"))
            .unwrap();

        let out = InspectSessionTool
            .execute(json!({}), &ctx)
            .await
            .into_result()
            .unwrap();
        assert_eq!(out["session_id"], "me");
        assert_eq!(out["completed_steps"], json!(["analyzed_repo"]));
        assert!(out.get("expires_at").is_some());

        let missing = InspectSessionTool
            .execute(json!({ "target": "nobody" }), &ctx)
            .await;
        assert!(!missing.is_success());
    }

    #[tokio::test]
    async fn test_delete_session() {
        let (store, _) = store();
        let ctx = context(&store, "me");
        let _ = context(&store, "other");

        let own = DeleteSessionTool.execute(json!({ "target": "me" }), &ctx).await;
        assert!(!own.is_success());

        let out = DeleteSessionTool
            .execute(json!({ "target": "other" }), &ctx)
            .await
            .into_result()
            .unwrap();
        assert_eq!(out["deleted"], true);
        assert_eq!(store.list(), vec![SessionId::from("me")]);
    }

    #[tokio::test]
    async fn test_label_values_must_be_strings() {
        let (store, _) = store();
        let ctx = context(&store, "me");
        let out = LabelSessionTool
            .execute(json!({ "labels": { "replicas": 3 } }), &ctx)
            .await;
        assert!(!out.is_success());
    }

    #[test]
    fn test_shapes() {
        assert_eq!(DeleteSessionTool.input_shape().required_fields(), vec!["target"]);
        assert!(ListSessionsTool.input_shape().required_fields().is_empty());
        assert!(InspectSessionTool.input_shape().is_optional("target"));
    }
}
