//! Route errors

use crate::graph::{GraphError, Step};
use crate::locks::LockError;
use crate::session::SessionError;
use crate::tools::ShapeIssue;
use serde_json::{json, Value};
use thiserror::Error;

/// Why a route call did not produce a result
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    /// No tool registered under this name
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// Parameters failed the tool's input shape
    #[error("Invalid parameters for '{tool}': {}", join_issues(.issues))]
    InvalidParams { tool: String, issues: Vec<ShapeIssue> },

    /// Missing steps cannot be resolved; raised before any corrective runs
    #[error("Cannot resolve prerequisites: {0}")]
    Dependency(#[from] GraphError),

    /// A prerequisite tool failed; earlier progress was persisted
    #[error("Prerequisite '{step}' failed in '{tool}': {message}")]
    CorrectiveFailed {
        step: Step,
        tool: String,
        message: String,
        guidance: Option<String>,
    },

    /// The requested tool reported failure
    #[error("Tool '{tool}' failed: {message}")]
    ToolFailed {
        tool: String,
        message: String,
        guidance: Option<String>,
    },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Resource busy: {0}")]
    LockTimeout(#[from] LockError),

    /// The caller cancelled the route between tool invocations
    #[error("Route cancelled")]
    Cancelled,

    /// A tool panicked or its task was lost
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_issues(issues: &[ShapeIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RouteError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) => "tool_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Dependency(GraphError::NoProvider { .. }) => "unsatisfiable_dependency",
            Self::Dependency(GraphError::CircularDependency { .. }) => "circular_dependency",
            Self::CorrectiveFailed { .. } => "corrective_failed",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Session(SessionError::CapacityExceeded { .. }) => "session_capacity",
            Self::Session(SessionError::NotFound(_)) => "session_not_found",
            Self::LockTimeout(_) => "lock_timeout",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the same call may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Hint for the caller, when the failing tool or error kind offers one
    pub fn guidance(&self) -> Option<&str> {
        match self {
            Self::CorrectiveFailed { guidance, .. } | Self::ToolFailed { guidance, .. } => {
                guidance.as_deref()
            }
            Self::LockTimeout(_) => Some("Another operation holds this resource; retry shortly"),
            Self::Session(SessionError::CapacityExceeded { .. }) => {
                Some("Delete unused sessions or wait for them to expire")
            }
            _ => None,
        }
    }

    /// JSON view for transports
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "code": self.code(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let Some(guidance) = self.guidance() {
            value["guidance"] = json!(guidance);
        }
        if let Self::CorrectiveFailed { step, tool, .. } = self {
            value["step"] = json!(step);
            value["tool"] = json!(tool);
        }
        value
    }
}
