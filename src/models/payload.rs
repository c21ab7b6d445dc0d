//! Dynamic request/response payloads.
//!
//! Remote APIs at this layer are schema-less: stored config, not compiled
//! structs, decides the shape of the data. Payloads are therefore plain
//! JSON object maps.

use serde_json::{Map, Value};

/// Key → dynamic value container used for all request and response data.
pub type Payload = Map<String, Value>;

/// Render a dynamic value as the plain text used in query strings, SOAP
/// element bodies, path placeholders and display labels.
///
/// Strings are emitted verbatim (no quotes), null becomes the empty string,
/// and arrays/objects fall back to compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
