//! Session id extraction from a create-session response.

use serde_json::Value;

/// Used when the create-session response carries no recognizable id.
pub const DEFAULT_SESSION_ID: &str = "default-session";

/// Look up the session id in the common response shapes, in order:
/// `session_id`, `sessionId`, `id`, `session.id`.
///
/// Empty strings and nulls are skipped; numeric ids are rendered as text.
pub fn extract_session_id(response: &Value) -> Option<String> {
    let candidates = [
        response.get("session_id"),
        response.get("sessionId"),
        response.get("id"),
        response.get("session").and_then(|s| s.get("id")),
    ];

    candidates.into_iter().flatten().find_map(id_text)
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_order() {
        assert_eq!(
            extract_session_id(&json!({ "id": "c", "sessionId": "b", "session_id": "a" })),
            Some("a".to_string())
        );
        assert_eq!(
            extract_session_id(&json!({ "id": "c", "sessionId": "b" })),
            Some("b".to_string())
        );
        assert_eq!(
            extract_session_id(&json!({ "session": { "id": "d" }, "id": "c" })),
            Some("c".to_string())
        );
        assert_eq!(
            extract_session_id(&json!({ "session": { "id": "d" } })),
            Some("d".to_string())
        );
    }

    #[test]
    fn test_empty_and_missing() {
        assert_eq!(extract_session_id(&json!({ "session_id": "", "id": "x" })), Some("x".to_string()));
        assert_eq!(extract_session_id(&json!({ "session_id": null })), None);
        assert_eq!(extract_session_id(&json!({ "text": "<html>" })), None);
        assert_eq!(extract_session_id(&json!([1, 2])), None);
    }

    #[test]
    fn test_numeric_id() {
        assert_eq!(extract_session_id(&json!({ "id": 42 })), Some("42".to_string()));
    }
}
