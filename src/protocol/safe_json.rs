//! Boundary validation for dynamic JSON values (spec §6, Design Note
//! "Dynamic JSON values"). Every value that crosses the wire — user
//! metadata, operation payloads, presence data, call kwargs — passes
//! through here before it reaches a CRDT or a handler.

use crate::errors::ProtocolError;

/// Keys that would shadow prototype internals if ever reflected into an
/// object, plus the broader `_`-prefix rule applied separately below.
pub const DANGEROUS_KEYS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__class__",
    "__init__",
    "__new__",
    "__dict__",
];

pub const MAX_NESTING_DEPTH: usize = 5;
pub const MAX_ID_LENGTH: usize = 256;
pub const MAX_NAME_LENGTH: usize = 512;
pub const MAX_PATH_LENGTH: usize = 1024;
pub const MAX_ARGS_COUNT: usize = 100;
pub const MAX_VALUE_SIZE: usize = 100 * 1024;
pub const MAX_PRESENCE_DATA_SIZE: usize = 10 * 1024;

/// Validate a JSON value against the size cap, nesting depth, and key
/// denylist. `max_bytes` is the caller's context-specific cap (general
/// values use [`MAX_VALUE_SIZE`], presence payloads use
/// [`MAX_PRESENCE_DATA_SIZE`]).
pub fn validate(value: &serde_json::Value, max_bytes: usize) -> Result<(), ProtocolError> {
    let size = serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(usize::MAX);
    if size > max_bytes {
        return Err(ProtocolError::ValueTooLarge { limit: max_bytes });
    }
    check_depth(value, 0)
}

fn check_depth(value: &serde_json::Value, depth: usize) -> Result<(), ProtocolError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::TooDeep { max: MAX_NESTING_DEPTH });
    }
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                if key.starts_with('_') || DANGEROUS_KEYS.contains(&key.as_str()) {
                    return Err(ProtocolError::DangerousKey(key.clone()));
                }
                check_depth(v, depth + 1)?;
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                check_depth(item, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Check a user-supplied string field against a length cap.
pub fn check_len(field: &'static str, s: &str, max: usize) -> Result<(), ProtocolError> {
    if s.len() > max {
        return Err(ProtocolError::FieldTooLong { field, max });
    }
    Ok(())
}

/// Check a user-supplied list field against a count cap.
pub fn check_count<T>(field: &'static str, items: &[T], max: usize) -> Result<(), ProtocolError> {
    if items.len() > max {
        return Err(ProtocolError::ListTooLong { field, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dangerous_key_at_any_depth() {
        let value = serde_json::json!({"a": {"__proto__": 1}});
        assert!(validate(&value, MAX_VALUE_SIZE).is_err());
    }

    #[test]
    fn rejects_underscore_prefixed_key() {
        let value = serde_json::json!({"_private": 1});
        assert!(validate(&value, MAX_VALUE_SIZE).is_err());
    }

    #[test]
    fn rejects_excess_nesting() {
        let value = serde_json::json!({"a": {"b": {"c": {"d": {"e": {"f": 1}}}}}});
        assert!(validate(&value, MAX_VALUE_SIZE).is_err());
    }

    #[test]
    fn accepts_plain_value() {
        let value = serde_json::json!({"cursor": {"x": 1, "y": 2}, "status": "typing"});
        assert!(validate(&value, MAX_PRESENCE_DATA_SIZE).is_ok());
    }

    #[test]
    fn rejects_oversized_value() {
        let value = serde_json::json!("x".repeat(20_000));
        assert!(validate(&value, MAX_PRESENCE_DATA_SIZE).is_err());
    }
}
