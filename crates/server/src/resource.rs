//! Flat REST routes over the store.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::store::{Store, StoreError, UpdateMode};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn api_error(err: StoreError) -> ApiError {
    let status = match &err {
        StoreError::ResourceNotFound(_) | StoreError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::NotACollection(_) | StoreError::InvalidBody(_) => StatusCode::BAD_REQUEST,
        StoreError::DuplicateId { .. } => StatusCode::CONFLICT,
        StoreError::Persist { .. } | StoreError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "store operation failed");
    }
    (status, Json(ErrorResponse { error: err.to_string() }))
}

pub fn router(store: Store) -> Router {
    Router::new()
        .route("/db", get(db))
        .route(
            "/{resource}",
            get(list).post(create).put(replace_singular).patch(merge_singular),
        )
        .route(
            "/{resource}/{id}",
            get(show).put(replace).patch(merge).delete(destroy),
        )
        .with_state(store)
}

async fn db(State(store): State<Store>) -> Json<Value> {
    Json(Value::Object(store.snapshot().await))
}

async fn list(
    State(store): State<Store>,
    Path(resource): Path<String>,
    Query(filters): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Value>> {
    store.list(&resource, &filters).await.map(Json).map_err(api_error)
}

async fn show(State(store): State<Store>, Path((resource, id)): Path<(String, String)>) -> ApiResult<Json<Value>> {
    store.get(&resource, &id).await.map(Json).map_err(api_error)
}

async fn create(
    State(store): State<Store>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    store
        .insert(&resource, body)
        .await
        .map(|created| (StatusCode::CREATED, Json(created)))
        .map_err(api_error)
}

async fn replace(
    State(store): State<Store>,
    Path((resource, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    store
        .update(&resource, &id, body, UpdateMode::Replace)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn merge(
    State(store): State<Store>,
    Path((resource, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    store
        .update(&resource, &id, body, UpdateMode::Merge)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn replace_singular(
    State(store): State<Store>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    store
        .update_singular(&resource, body, UpdateMode::Replace)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn merge_singular(
    State(store): State<Store>,
    Path(resource): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    store
        .update_singular(&resource, body, UpdateMode::Merge)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn destroy(State(store): State<Store>, Path((resource, id)): Path<(String, String)>) -> ApiResult<Json<Value>> {
    store
        .remove(&resource, &id)
        .await
        .map(|()| Json(json!({})))
        .map_err(api_error)
}
