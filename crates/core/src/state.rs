//! Store State: collection name -> records (or a singular object).

use serde_json::{Map, Value};

use crate::error::LoadError;

/// Full in-memory snapshot of every collection.
///
/// Backed by an insertion-ordered map so snapshots and persisted files keep
/// the collection order of the source.
pub type StoreState = Map<String, Value>;

/// Accept a parsed document as Store State.
///
/// Only JSON objects qualify; `location` names the source in the error.
pub fn into_state(value: Value, location: &str) -> Result<StoreState, LoadError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(LoadError::NotAnObject {
            location: location.to_string(),
        }),
    }
}

/// Collection names in source order.
pub fn resource_names(state: &StoreState) -> impl Iterator<Item = &str> {
    state.keys().map(String::as_str)
}
