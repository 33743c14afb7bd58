//! Parameter normalization

use crate::session::SessionId;
use serde_json::{Map, Value};

/// Fill in `path` when absent and stamp the resolved session id.
///
/// Non-object parameters are returned untouched so shape validation can
/// report them.
pub fn normalize_params(params: Value, session_id: &SessionId, default_path: &str) -> Value {
    let mut object = match params {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => return other,
    };

    let path_missing = object.get("path").map_or(true, |p| {
        p.is_null() || p.as_str().is_some_and(str::is_empty)
    });
    if path_missing {
        object.insert("path".to_string(), Value::String(default_path.to_string()));
    }
    object.insert(
        "session_id".to_string(),
        Value::String(session_id.as_str().to_string()),
    );

    Value::Object(object)
}
