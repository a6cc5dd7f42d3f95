//! `/collections` handlers.

use crate::{
    api::{AppState, error::ApiError},
    collections::{Collection, CollectionDetails, CollectionError, CollectionJobView, CreationRequest},
    response::ApiResponse,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Schedule creation of a vector store (and optional Assistant) from uploaded documents.
pub(super) async fn create_collection(
    State(state): State<AppState>,
    request: Result<Json<CreationRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<CollectionJobView>>, ApiError> {
    let Json(request) = request?;
    let has_callback = request
        .callback_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());

    let view = state.collections.create(request).await?;
    let poll = format!("/collections/jobs/{}", view.job_id);
    let mut response = ApiResponse::success(view);
    if !has_callback {
        response = response.with_metadata(json!({
            "note": format!(
                "This request is processed asynchronously. No callback_url was provided; poll {poll} for the final status."
            ),
            "status_check_url": poll,
        }));
    }
    Ok(Json(response))
}

/// Report a collection job, embedding the collection once it exists.
pub(super) async fn get_collection_job(
    State(state): State<AppState>,
    job_id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<CollectionJobView>>, ApiError> {
    let Path(raw) = job_id?;
    let view = state.collections.job_info(parse_id(&raw)?).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// List active collections.
pub(super) async fn list_collections(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<Collection>>> {
    Json(ApiResponse::success(state.collections.list().await))
}

/// Return one active collection with its documents.
pub(super) async fn get_collection(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<CollectionDetails>>, ApiError> {
    let Path(raw) = id?;
    let details = state.collections.info(parse_id(&raw)?).await?;
    Ok(Json(ApiResponse::success(details)))
}

#[derive(Deserialize)]
pub(super) struct DeleteParams {
    #[serde(default)]
    callback_url: Option<String>,
}

/// Schedule removal of a collection's provider resources.
pub(super) async fn delete_collection(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> Result<Json<ApiResponse<CollectionJobView>>, ApiError> {
    let Path(raw) = id?;
    let Query(params) = params?;
    let view = state
        .collections
        .delete(parse_id(&raw)?, params.callback_url.as_deref())
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

fn parse_id(raw: &str) -> Result<Uuid, CollectionError> {
    Uuid::parse_str(raw.trim()).map_err(|_| CollectionError::InvalidId(raw.to_string()))
}
