//! Tool Contract
//!
//! Every routable operation implements [`Tool`]. The router looks tools up
//! by name in a [`ToolRegistry`], checks parameters against the tool's
//! [`InputShape`], and runs it with a [`ToolContext`].
//!
//! # Outcomes
//!
//! Tools report business failures as [`ToolOutcome::Failure`] with an
//! optional hint for the caller. Panics are caught by the router.
//!
//! # Resource Locks
//!
//! A tool that mutates a physical resource returns a [`ResourceKey`] from
//! [`Tool::resource_key`]; the router then serializes it against every
//! other invocation on the same key.

mod registry;
pub mod session;
mod shape;

pub use registry::{ToolDefinition, ToolRegistry};
pub use shape::{InputShape, InputShapeBuilder, ShapeIssue};

use crate::context::ToolContext;
use crate::locks::ResourceKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Why a tool did not succeed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub message: String,

    /// Suggested next action for the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
}

/// Result of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(Value),
    Failure(ToolFailure),
}

impl ToolOutcome {
    pub fn success(value: Value) -> Self {
        Self::Success(value)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(ToolFailure {
            message: message.into(),
            guidance: None,
        })
    }

    pub fn failure_with_guidance(message: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self::Failure(ToolFailure {
            message: message.into(),
            guidance: Some(guidance.into()),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<Value, ToolFailure> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(failure) => Err(failure),
        }
    }
}

/// Trait for routable tools
///
/// Each tool must provide:
/// - A unique name
/// - A description of what it does
/// - An input shape for its parameters
/// - An async execute method
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g., "build_image")
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Parameter shape
    fn input_shape(&self) -> InputShape;

    /// Execute the tool
    ///
    /// `params` have already been checked against [`Tool::input_shape`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolOutcome;

    /// Resource this invocation mutates, if any
    fn resource_key(&self, _params: &Value) -> Option<ResourceKey> {
        None
    }

    /// Lock wait override; `None` uses the router default
    fn lock_timeout(&self) -> Option<Duration> {
        None
    }

    /// Definition for tool listings
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_shape().schema().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_conversion() {
        assert_eq!(
            ToolOutcome::success(json!({"ok": true})).into_result(),
            Ok(json!({"ok": true}))
        );

        let failure = ToolOutcome::failure_with_guidance("no daemon", "start docker")
            .into_result()
            .unwrap_err();
        assert_eq!(failure.message, "no daemon");
        assert_eq!(failure.guidance.as_deref(), Some("start docker"));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ToolOutcome::failure("boom")).unwrap();
        assert_eq!(json, json!({"status": "failure", "data": {"message": "boom"}}));
    }
}
