//! `/evaluations` handlers.

use crate::{
    api::{AppState, error::ApiError},
    evaluations::{EvaluationRun, ExportFormat, NewEvaluationRun, ScoreQuery, StatusUpdate},
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

#[derive(Deserialize)]
pub(super) struct ScoreParams {
    #[serde(default)]
    get_trace_info: bool,
    #[serde(default)]
    resync_score: bool,
    #[serde(default)]
    export_format: Option<String>,
}

impl ScoreParams {
    fn into_query(self) -> Result<ScoreQuery, ApiError> {
        let export_format = match self.export_format.as_deref().map(str::trim) {
            None | Some("") => ExportFormat::default(),
            Some(raw) => raw.parse()?,
        };
        Ok(ScoreQuery {
            get_trace_info: self.get_trace_info,
            resync_score: self.resync_score,
            export_format,
        })
    }
}

/// Return a run, optionally with its (cached or freshly synced) trace scores.
///
/// Failures that still have a run to show (non-completed run, trace store errors, grouping
/// errors) come back as 200 with `success: false`.
pub(super) async fn get_evaluation(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    params: Result<Query<ScoreParams>, QueryRejection>,
) -> Result<Json<ApiResponse<EvaluationRun>>, ApiError> {
    let Path(raw) = id?;
    let id = parse_id(&raw)?;
    let Query(params) = params?;
    let outcome = state
        .evaluations
        .get_with_scores(id, params.into_query()?)
        .await?;
    let response = match outcome.error {
        Some(error) => ApiResponse::failure_with_data(error, outcome.run),
        None => ApiResponse::success(outcome.run),
    };
    Ok(Json(response))
}

/// Register a new evaluation run.
pub(super) async fn create_evaluation(
    State(state): State<AppState>,
    request: Result<Json<NewEvaluationRun>, JsonRejection>,
) -> Result<Json<ApiResponse<EvaluationRun>>, ApiError> {
    let Json(request) = request?;
    let run = state.evaluations.create(request).await?;
    Ok(Json(ApiResponse::success(run)))
}

#[derive(Deserialize)]
pub(super) struct ListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

/// List runs, newest first, without score payloads.
pub(super) async fn list_evaluations(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<EvaluationRun>>>, ApiError> {
    let Query(params) = params?;
    let runs = state.evaluations.list(params.limit, params.offset).await;
    Ok(Json(ApiResponse::success(runs)))
}

/// Apply a progress or status report from the batch runner.
pub(super) async fn update_evaluation(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    update: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<EvaluationRun>>, ApiError> {
    let Path(raw) = id?;
    let id = parse_id(&raw)?;
    let Json(update) = update?;
    let run = state.evaluations.update_status(id, update).await?;
    Ok(Json(ApiResponse::success(run)))
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim().parse().map_err(|_| {
        ApiError::unprocessable(format!(
            "Invalid evaluation id '{raw}': must be an integer"
        ))
    })
}
