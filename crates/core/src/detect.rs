//! Change detection for watched files.
//!
//! Editors and atomic writers touch files without changing their content, and
//! the server itself rewrites the source after every mutation. A reload is only
//! warranted when the parsed document differs structurally from what is being
//! served.

use std::fs;
use std::path::Path;

use serde_json::{Map, Number, Value};

use crate::error::ParseError;
use crate::state::StoreState;

/// Returns `true` when `new` differs structurally from `old`.
pub fn should_reload(old: &Value, new: &Value) -> bool {
    !structurally_equal(old, new)
}

/// Returns `true` when the candidate document differs from the served state.
pub fn state_changed(current: &StoreState, candidate: &Value) -> bool {
    match candidate {
        Value::Object(map) => !maps_equal(current, map),
        _ => true,
    }
}

/// Deep equality: arrays are order-sensitive, objects compare key sets and
/// values regardless of key order, numbers compare by numeric value.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| structurally_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => maps_equal(x, y),
        _ => false,
    }
}

fn maps_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(key, value)| b.get(key).is_some_and(|other| structurally_equal(value, other)))
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Read and parse a candidate file.
///
/// A half-written file surfaces as a [`ParseError`] naming the path and the
/// parser position, never as a panic.
pub fn parse_candidate(path: &Path) -> Result<Value, ParseError> {
    let contents = fs::read_to_string(path).map_err(|e| ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_str(path, &contents)
}

/// [`parse_candidate`] without blocking the runtime thread.
pub async fn read_candidate(path: &Path) -> Result<Value, ParseError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_str(path, &contents)
}

/// Parse already-read contents attributed to `path`.
pub fn parse_str(path: &Path, contents: &str) -> Result<Value, ParseError> {
    serde_json::from_str(contents).map_err(|e| ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    #[test]
    fn whitespace_rewrite_does_not_reload() {
        let path = PathBuf::from("db.json");
        let compact = parse_str(&path, r#"{"posts":[{"id":1,"title":"a"}]}"#).unwrap();
        let pretty = parse_str(&path, "{\n  \"posts\": [\n    { \"id\": 1, \"title\": \"a\" }\n  ]\n}\n").unwrap();
        assert!(!should_reload(&compact, &pretty));
    }

    #[test]
    fn key_order_is_irrelevant() {
        let a = json!({"posts": [{"id": 1, "title": "a"}], "comments": []});
        let b = json!({"comments": [], "posts": [{"title": "a", "id": 1}]});
        assert!(!should_reload(&a, &b));
    }

    #[test]
    fn array_order_matters() {
        let a = json!({"posts": [{"id": 1}, {"id": 2}]});
        let b = json!({"posts": [{"id": 2}, {"id": 1}]});
        assert!(should_reload(&a, &b));
    }

    #[test]
    fn integer_and_float_forms_are_equal() {
        assert!(structurally_equal(&json!(1), &json!(1.0)));
        assert!(!structurally_equal(&json!(1), &json!(1.5)));
        assert!(!structurally_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn changed_field_triggers_reload() {
        let a = json!({"posts": [{"id": 1, "title": "a"}]});
        let b = json!({"posts": [{"id": 1, "title": "b"}]});
        assert!(should_reload(&a, &b));
    }

    #[test]
    fn added_key_triggers_reload() {
        let a = json!({"posts": []});
        let b = json!({"posts": [], "comments": []});
        assert!(should_reload(&a, &b));
        assert!(should_reload(&b, &a));
    }

    #[test]
    fn state_changed_against_non_object() {
        let state = crate::state::into_state(json!({"posts": []}), "db.json").unwrap();
        assert!(!state_changed(&state, &json!({"posts": []})));
        assert!(state_changed(&state, &json!([])));
    }

    #[test]
    fn truncated_file_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, r#"{"posts": [{"id": 1"#).unwrap();

        let err = parse_candidate(&path).unwrap_err();
        assert_eq!(err.path, path);
        assert!(err.to_string().contains("db.json"));
        assert!(err.message.contains("line 1"));
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gone.json");
        let err = parse_candidate(&path).unwrap_err();
        assert_eq!(err.path, path);
    }

    #[tokio::test]
    async fn async_read_matches_sync_parse() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, r#"{"posts": [{"id": 1}]}"#).unwrap();
        assert_eq!(read_candidate(&path).await.unwrap(), parse_candidate(&path).unwrap());

        fs::write(&path, "{").unwrap();
        assert_eq!(read_candidate(&path).await.unwrap_err().path, path);
    }
}
