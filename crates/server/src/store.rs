//! Shared Store State with optional file persistence.
//!
//! Every mutation is written back to the source file through a temp file and
//! a rename, so the watcher only ever sees complete documents. The written
//! document equals the in-memory state, which keeps self-inflicted writes from
//! triggering a reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use jsonwatch_core::detect;
use jsonwatch_core::StoreState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    #[error("{resource}/{id} not found")]
    RecordNotFound { resource: String, id: String },

    #[error("resource '{0}' is not a collection")]
    NotACollection(String),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("{resource} already has a record with {field} {id}")]
    DuplicateId {
        resource: String,
        field: String,
        id: String,
    },

    #[error("failed to persist {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// How an update body is applied to an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// PUT: the body becomes the record (the id is kept).
    Replace,
    /// PATCH: top-level fields of the body overwrite the record's.
    Merge,
}

/// Cheaply cloneable handle to the served Store State.
#[derive(Debug, Clone)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
    id_field: Arc<str>,
    persist_to: Option<Arc<PathBuf>>,
}

impl Store {
    pub fn new(state: StoreState, id_field: impl Into<Arc<str>>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            id_field: id_field.into(),
            persist_to: None,
        }
    }

    /// Write every mutation back to `path`.
    pub fn persisted_to(mut self, path: PathBuf) -> Self {
        self.persist_to = Some(Arc::new(path));
        self
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Clone of the full state (snapshots, pretty-printing).
    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Whether `candidate` differs structurally from the served state.
    pub async fn differs_from(&self, candidate: &Value) -> bool {
        let state = self.state.read().await;
        detect::state_changed(&*state, candidate)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// A collection filtered by field equality, or a singular resource as-is.
    pub async fn list(&self, resource: &str, filters: &[(String, String)]) -> Result<Value, StoreError> {
        let state = self.state.read().await;
        match state.get(resource) {
            Some(Value::Array(records)) => Ok(Value::Array(
                records
                    .iter()
                    .filter(|record| matches_filters(record, filters))
                    .cloned()
                    .collect(),
            )),
            Some(other) => Ok(other.clone()),
            None => Err(StoreError::ResourceNotFound(resource.to_string())),
        }
    }

    pub async fn get(&self, resource: &str, id: &str) -> Result<Value, StoreError> {
        let state = self.state.read().await;
        let records = collection(&state, resource)?;
        records
            .iter()
            .find(|record| has_id(record, &self.id_field, id))
            .cloned()
            .ok_or_else(|| record_not_found(resource, id))
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Insert one record (object body) or several (array body).
    ///
    /// Records without an id get the next numeric id, or a UUID when the
    /// collection's ids are not numeric.
    pub async fn insert(&self, resource: &str, body: Value) -> Result<Value, StoreError> {
        let id_field = Arc::clone(&self.id_field);
        self.mutate(|state| {
            let records = collection_mut(state, resource)?;
            match body {
                Value::Object(record) => insert_one(records, resource, &id_field, record),
                Value::Array(items) => {
                    let mut inserted = Vec::with_capacity(items.len());
                    for item in items {
                        let Value::Object(record) = item else {
                            return Err(StoreError::InvalidBody("array items must be objects".to_string()));
                        };
                        inserted.push(insert_one(records, resource, &id_field, record)?);
                    }
                    Ok(Value::Array(inserted))
                }
                _ => Err(StoreError::InvalidBody("expected an object or an array of objects".to_string())),
            }
        })
        .await
    }

    pub async fn update(&self, resource: &str, id: &str, body: Value, mode: UpdateMode) -> Result<Value, StoreError> {
        let Value::Object(body) = body else {
            return Err(StoreError::InvalidBody("expected an object".to_string()));
        };
        let id_field = Arc::clone(&self.id_field);
        self.mutate(|state| {
            let records = collection_mut(state, resource)?;
            let record = records
                .iter_mut()
                .find(|record| has_id(record, &id_field, id))
                .ok_or_else(|| record_not_found(resource, id))?;
            let Value::Object(existing) = &mut *record else {
                return Err(record_not_found(resource, id));
            };
            let kept_id = existing.get(id_field.as_ref()).cloned();
            apply_update(existing, body, mode);
            if let Some(kept_id) = kept_id {
                existing.insert(id_field.to_string(), kept_id);
            }
            Ok(record.clone())
        })
        .await
    }

    /// Update a singular (object-valued) resource.
    pub async fn update_singular(&self, resource: &str, body: Value, mode: UpdateMode) -> Result<Value, StoreError> {
        let Value::Object(body) = body else {
            return Err(StoreError::InvalidBody("expected an object".to_string()));
        };
        self.mutate(|state| match state.get_mut(resource) {
            Some(Value::Object(existing)) => {
                apply_update(existing, body, mode);
                Ok(Value::Object(existing.clone()))
            }
            Some(_) => Err(StoreError::InvalidBody(format!("{resource} is a collection"))),
            None => Err(StoreError::ResourceNotFound(resource.to_string())),
        })
        .await
    }

    pub async fn remove(&self, resource: &str, id: &str) -> Result<(), StoreError> {
        let id_field = Arc::clone(&self.id_field);
        self.mutate(|state| {
            let records = collection_mut(state, resource)?;
            let index = records
                .iter()
                .position(|record| has_id(record, &id_field, id))
                .ok_or_else(|| record_not_found(resource, id))?;
            records.remove(index);
            Ok(())
        })
        .await
    }

    /// Apply `f` under the write lock, then persist while still holding it so
    /// the file never lags behind a later mutation.
    async fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let mut state = self.state.write().await;
        let out = f(&mut *state)?;
        if let Some(path) = &self.persist_to {
            write_atomic(path, &*state).await?;
        }
        Ok(out)
    }
}

/// Write `state` pretty-printed to a dot-prefixed temp file, then rename it
/// over `path`.
pub async fn write_atomic(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let persist_err = |source| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "db.json".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let json = serde_json::to_string_pretty(state)?;
    fs::write(&tmp_path, json).await.map_err(persist_err)?;
    fs::rename(&tmp_path, path).await.map_err(persist_err)?;

    debug!(path = %path.display(), "persisted store state");
    Ok(())
}

/// String form used for id and filter comparison; containers never match.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Every filter must equal the record's field; `_`-prefixed parameters are
/// reserved and ignored.
fn matches_filters(record: &Value, filters: &[(String, String)]) -> bool {
    filters
        .iter()
        .filter(|(key, _)| !key.starts_with('_'))
        .all(|(key, expected)| record.get(key).and_then(scalar_text).as_deref() == Some(expected.as_str()))
}

fn has_id(record: &Value, id_field: &str, id: &str) -> bool {
    record.get(id_field).and_then(scalar_text).as_deref() == Some(id)
}

fn record_not_found(resource: &str, id: &str) -> StoreError {
    StoreError::RecordNotFound {
        resource: resource.to_string(),
        id: id.to_string(),
    }
}

fn collection<'a>(state: &'a StoreState, resource: &str) -> Result<&'a Vec<Value>, StoreError> {
    match state.get(resource) {
        Some(Value::Array(records)) => Ok(records),
        Some(_) => Err(StoreError::NotACollection(resource.to_string())),
        None => Err(StoreError::ResourceNotFound(resource.to_string())),
    }
}

fn collection_mut<'a>(state: &'a mut StoreState, resource: &str) -> Result<&'a mut Vec<Value>, StoreError> {
    match state.get_mut(resource) {
        Some(Value::Array(records)) => Ok(records),
        Some(_) => Err(StoreError::NotACollection(resource.to_string())),
        None => Err(StoreError::ResourceNotFound(resource.to_string())),
    }
}

fn insert_one(
    records: &mut Vec<Value>,
    resource: &str,
    id_field: &str,
    mut record: Map<String, Value>,
) -> Result<Value, StoreError> {
    match record.get(id_field).and_then(scalar_text) {
        Some(id) if records.iter().any(|r| has_id(r, id_field, &id)) => {
            return Err(StoreError::DuplicateId {
                resource: resource.to_string(),
                field: id_field.to_string(),
                id,
            });
        }
        Some(_) => {}
        None => {
            record.insert(id_field.to_string(), next_id(records, id_field));
        }
    }
    let record = Value::Object(record);
    records.push(record.clone());
    Ok(record)
}

/// Max numeric id + 1; a UUID when ids are not all integers or the numeric
/// space is exhausted.
fn next_id(records: &[Value], id_field: &str) -> Value {
    let mut max = 0i64;
    for id in records.iter().filter_map(|r| r.get(id_field)) {
        match id.as_i64() {
            Some(n) => max = max.max(n),
            None => return uuid_id(),
        }
    }
    max.checked_add(1).map_or_else(uuid_id, Value::from)
}

fn uuid_id() -> Value {
    Value::String(Uuid::new_v4().to_string())
}

fn apply_update(existing: &mut Map<String, Value>, body: Map<String, Value>, mode: UpdateMode) {
    if mode == UpdateMode::Replace {
        existing.clear();
    }
    existing.extend(body);
}
