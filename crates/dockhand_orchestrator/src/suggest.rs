//! Parameter Suggestion
//!
//! An optional collaborator (typically backed by a language model) that
//! proposes values for required parameters the caller left out. The router
//! only asks for fields that are actually missing, validates whatever comes
//! back against the tool's shape, and never lets a suggestion override a
//! caller-supplied value.

use crate::session::Session;
use crate::tools::InputShape;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Suggestion backend errors. Never fatal to a route.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SuggestError {
    #[error("Suggestion backend unavailable")]
    Unavailable,

    #[error("Suggestion backend failed: {0}")]
    Backend(String),

    #[error("Invalid suggestion: {0}")]
    Invalid(String),
}

/// What the suggester is asked to fill in
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionRequest {
    pub tool_name: String,

    /// Every field the tool's shape requires
    pub required_fields: Vec<String>,

    /// Required fields absent from the caller's parameters
    pub missing_fields: Vec<String>,

    /// JSON schema of the tool's input, for declared types and descriptions
    pub shape: Value,

    /// Parameters after normalization
    pub current_params: Value,

    /// Session state at the time of the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

/// Values proposed by the suggester
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub suggestions: Map<String, Value>,

    /// Backend confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Source of parameter suggestions
#[async_trait]
pub trait ParameterSuggester: Send + Sync {
    /// Whether the backend can be called right now
    async fn is_available(&self) -> bool;

    async fn suggest(&self, request: SuggestionRequest) -> Result<Suggestion, SuggestError>;

    /// Keep only declared fields whose values fit the shape
    fn validate(
        &self,
        suggestions: Map<String, Value>,
        shape: &InputShape,
    ) -> Result<Map<String, Value>, SuggestError> {
        Ok(suggestions
            .into_iter()
            .filter(|(field, value)| shape.accepts(field, value))
            .collect())
    }
}

/// Merge suggested values under `params`; existing non-null values win
pub fn merge_suggestions(params: &mut Value, suggestions: Map<String, Value>) -> Vec<String> {
    let mut applied = Vec::new();
    if let Some(object) = params.as_object_mut() {
        for (field, value) in suggestions {
            let vacant = object.get(&field).map_or(true, Value::is_null);
            if vacant {
                object.insert(field.clone(), value);
                applied.push(field);
            }
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed;

    #[async_trait]
    impl ParameterSuggester for Fixed {
        async fn is_available(&self) -> bool {
            true
        }

        async fn suggest(&self, _request: SuggestionRequest) -> Result<Suggestion, SuggestError> {
            Ok(Suggestion::default())
        }
    }

    #[test]
    fn test_default_validate_filters_by_shape() {
        let shape = InputShape::builder()
            .required("image_id", "string", "")
            .required("replicas", "integer", "")
            .build();
        let suggestions = json!({
            "image_id": "app:latest",
            "replicas": "two",
            "undeclared": true
        });

        let kept = Fixed
            .validate(suggestions.as_object().cloned().unwrap(), &shape)
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept["image_id"], "app:latest");
    }

    #[test]
    fn test_merge_keeps_caller_values() {
        let mut params = json!({ "namespace": "prod", "image_id": null });
        let applied = merge_suggestions(
            &mut params,
            json!({ "namespace": "staging", "image_id": "app:1" })
                .as_object()
                .cloned()
                .unwrap(),
        );

        assert_eq!(applied, vec!["image_id".to_string()]);
        assert_eq!(params, json!({ "namespace": "prod", "image_id": "app:1" }));
    }
}
