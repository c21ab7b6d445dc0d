//! Declarative payload mapping between local and remote field names.
//!
//! Only the `Simple` engine does any work:
//!
//! ```yaml
//! MappingOutbound:
//!   Type: Simple
//!   Config:
//!     KeyMapDefault:
//!       MapTo: "1"        # copy every source key as-is
//!     KeyMap:
//!       CustomerID: id    # source key -> destination key
//! ```
//!
//! Any other type (including `XSLT`) passes data through untouched.

use serde_json::Value;

use crate::errors::MappingError;
use crate::models::{MappingConfig, Payload};

pub const SIMPLE: &str = "Simple";

/// Transform `data` according to `mapping`.
pub fn apply(mapping: &MappingConfig, data: Payload) -> Result<Payload, MappingError> {
    match mapping.kind.as_str() {
        SIMPLE => apply_simple(mapping, data),
        "" => Ok(data),
        other => {
            tracing::debug!(mapping_type = other, "unknown mapping type, passing data through");
            Ok(data)
        }
    }
}

fn apply_simple(mapping: &MappingConfig, data: Payload) -> Result<Payload, MappingError> {
    let config = match &mapping.config {
        Some(c) if !c.is_empty() => c,
        _ => return Ok(data),
    };

    let mut result = Payload::new();

    if let Some(default) = config.get("KeyMapDefault") {
        let default = default.as_object().ok_or_else(|| {
            MappingError::InvalidConfig("KeyMapDefault must be a map".into())
        })?;
        if default.get("MapTo").is_some_and(is_enabled) {
            result.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    if let Some(key_map) = config.get("KeyMap") {
        let key_map = key_map
            .as_object()
            .ok_or_else(|| MappingError::InvalidConfig("KeyMap must be a map".into()))?;
        for (from, to) in key_map {
            let Some(to) = to.as_str() else {
                tracing::debug!(key = %from, "skipping KeyMap entry with non-string target");
                continue;
            };
            if let Some(value) = data.get(from) {
                result.insert(to.to_string(), value.clone());
            }
        }
    }

    // Nothing matched: treat as a no-op rather than an empty payload.
    if result.is_empty() {
        return Ok(data);
    }

    Ok(result)
}

fn is_enabled(flag: &Value) -> bool {
    match flag {
        Value::String(s) => s == "1",
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}
