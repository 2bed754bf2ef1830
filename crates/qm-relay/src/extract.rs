//! Request id extraction
//!
//! Payload shapes vary between producers, so ids are looked up through an
//! ordered list of field paths. The first path yielding a non-empty value wins.

use serde_json::Value;

/// A field path into a JSON payload, outermost key first
pub type FieldPath = &'static [&'static str];

/// Rules applied to consumed messages
pub const CONSUMER_RULES: &[FieldPath] = &[&["requestId"], &["data", "requestId"]];

/// Rules applied to status lookups, which also accept ids nested in an ESB body
pub const TRACKING_RULES: &[FieldPath] = &[
    &["requestId"],
    &["data", "requestId"],
    &["esbBody", "requestId"],
    &["data", "esbBody", "requestId"],
];

fn lookup<'a>(payload: &'a Value, path: FieldPath) -> Option<&'a Value> {
    path.iter().try_fold(payload, |node, key| node.as_object()?.get(*key))
}

/// Id of a consumed message. Only non-empty strings qualify.
pub fn consumer_request_id(payload: &Value) -> Option<String> {
    CONSUMER_RULES.iter().find_map(|&path| match lookup(payload, path) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

/// Id carried by a status lookup body. Strings are trimmed and numbers are
/// stringified.
pub fn tracking_id(payload: &Value) -> Option<String> {
    TRACKING_RULES.iter().find_map(|&path| match lookup(payload, path) {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
