//! Input Shape - JSON Schema Introspection for Tool Parameters
//!
//! Wraps a tool's JSON input schema and answers the questions the router
//! asks of it: which fields are required, which are optional, and whether a
//! parameter object conforms.
//!
//! Shapes come from a `schemars::JsonSchema` type or are assembled by hand:
//!
//! ```ignore
//! let shape = InputShape::builder()
//!     .required("image_id", "string", "Image reference to deploy")
//!     .optional("namespace", "string", "Target namespace")
//!     .build();
//! ```

use schemars::JsonSchema;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// A single way a parameter object fails its shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeIssue {
    #[error("Parameters must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("Missing required parameter: {field}")]
    Missing { field: String },

    #[error("Parameter '{field}' should be {expected}, got {found}")]
    WrongType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Parameter '{field}' is not one of the allowed values")]
    NotAllowed { field: String },

    #[error("Unexpected parameter: {field}")]
    Unexpected { field: String },
}

/// JSON-schema backed description of a tool's parameters
#[derive(Debug, Clone, PartialEq)]
pub struct InputShape {
    schema: Value,
}

impl InputShape {
    /// Wrap an existing JSON schema document
    pub fn from_schema(schema: Value) -> Self {
        Self { schema }
    }

    /// Derive the shape of a `JsonSchema` type
    pub fn of<T: JsonSchema>() -> Self {
        Self::from_schema(schemars::schema_for!(T).to_value())
    }

    /// Shape that accepts any object
    pub fn any() -> Self {
        Self::from_schema(json!({ "type": "object" }))
    }

    pub fn builder() -> InputShapeBuilder {
        InputShapeBuilder::default()
    }

    /// Raw schema document
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    fn properties(&self) -> Option<&Map<String, Value>> {
        self.schema.get("properties").and_then(Value::as_object)
    }

    fn property(&self, field: &str) -> Option<&Value> {
        self.properties().and_then(|p| p.get(field))
    }

    /// Declared field names, in schema order
    pub fn fields(&self) -> Vec<String> {
        self.properties()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn required_fields(&self) -> Vec<String> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_required(&self, field: &str) -> bool {
        self.required_fields().iter().any(|f| f == field)
    }

    /// Declared but not required
    pub fn is_optional(&self, field: &str) -> bool {
        self.property(field).is_some() && !self.is_required(field)
    }

    /// Required fields absent (or null) in `params`
    pub fn missing_required(&self, params: &Value) -> Vec<String> {
        self.required_fields()
            .into_iter()
            .filter(|field| params.get(field).map_or(true, Value::is_null))
            .collect()
    }

    /// Check `params` against the shape, collecting every issue
    pub fn validate(&self, params: &Value) -> Result<(), Vec<ShapeIssue>> {
        let Some(object) = params.as_object() else {
            return Err(vec![ShapeIssue::NotAnObject {
                found: json_type(params).to_string(),
            }]);
        };

        let mut issues: Vec<ShapeIssue> = self
            .missing_required(params)
            .into_iter()
            .map(|field| ShapeIssue::Missing { field })
            .collect();

        let closed = self.schema.get("additionalProperties") == Some(&Value::Bool(false));

        for (field, value) in object {
            match self.property(field) {
                Some(property) => issues.extend(check_property(field, property, value)),
                None if closed => issues.push(ShapeIssue::Unexpected {
                    field: field.clone(),
                }),
                None => {}
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Whether a single value fits the declared type of `field`.
    ///
    /// Undeclared fields are never valid.
    pub fn accepts(&self, field: &str, value: &Value) -> bool {
        self.property(field)
            .map(|property| check_property(field, property, value).is_none())
            .unwrap_or(false)
    }
}

fn check_property(field: &str, property: &Value, value: &Value) -> Option<ShapeIssue> {
    if let Some(expected) = property.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            return Some(ShapeIssue::WrongType {
                field: field.to_string(),
                expected: allowed.join(" or "),
                found: json_type(value).to_string(),
            });
        }
    }

    if let Some(options) = property.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Some(ShapeIssue::NotAllowed {
                field: field.to_string(),
            });
        }
    }

    None
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Hand-assembled [`InputShape`]
#[derive(Debug, Default)]
pub struct InputShapeBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
    closed: bool,
}

impl InputShapeBuilder {
    pub fn required(mut self, name: &str, json_type: &str, description: &str) -> Self {
        self.add(name, json_type, description);
        self.required.push(name.to_string());
        self
    }

    pub fn optional(mut self, name: &str, json_type: &str, description: &str) -> Self {
        self.add(name, json_type, description);
        self
    }

    /// Reject parameters that are not declared
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    fn add(&mut self, name: &str, json_type: &str, description: &str) {
        self.properties.insert(
            name.to_string(),
            json!({ "type": json_type, "description": description }),
        );
    }

    pub fn build(self) -> InputShape {
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(self.properties),
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        if self.closed {
            schema["additionalProperties"] = Value::Bool(false);
        }
        InputShape::from_schema(schema)
    }
}
