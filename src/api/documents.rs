//! `/documents` handlers: multipart upload and document/transformation lookups.

use crate::{
    api::{AppState, error::ApiError},
    documents::{
        Document, DocumentError, DocumentUploadResponse, NewUpload, TransformationJobInfo,
        TransformationJobView, TransformationJobsView,
    },
    response::ApiResponse,
};
use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartRejection},
        rejection::{PathRejection, QueryRejection},
    },
};
use serde::Deserialize;
use uuid::Uuid;

/// Fields collected from the upload form before validation.
#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    target_format: Option<String>,
    transformer: Option<String>,
    callback_url: Option<String>,
}

/// Accept a multipart upload, store it and optionally schedule a transformation.
///
/// The `src` part is streamed chunk by chunk so oversized uploads are rejected as soon as the
/// configured ceiling is crossed.
pub(super) async fn upload_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<DocumentUploadResponse>>, ApiError> {
    let mut multipart = multipart?;
    let max_bytes = state.documents.max_upload_bytes();
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| DocumentError::Multipart(err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "src" => {
                let fname = field
                    .file_name()
                    .map(str::trim)
                    .filter(|fname| !fname.is_empty())
                    .map(str::to_string)
                    .ok_or(DocumentError::MissingFilename)?;
                let bytes = read_limited(field, max_bytes, state.documents.max_upload_mb()).await?;
                form.file = Some((fname, bytes));
            }
            "target_format" => form.target_format = read_text(field).await?,
            "transformer" => form.transformer = read_text(field).await?,
            "callback_url" => form.callback_url = read_text(field).await?,
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    let (fname, bytes) = form.file.ok_or(DocumentError::MissingFile)?;
    if bytes.is_empty() {
        return Err(DocumentError::Empty.into());
    }

    let plan = state.documents.plan_transformation(
        &fname,
        form.target_format.as_deref(),
        form.transformer.as_deref(),
    )?;
    let callback_url = state
        .documents
        .callback_url(form.callback_url.as_deref())
        .await?;

    let outcome = state
        .documents
        .upload(NewUpload {
            fname,
            bytes,
            plan,
            callback_url,
        })
        .await?;

    Ok(Json(ApiResponse::success(DocumentUploadResponse {
        transformation_job: outcome.job.as_ref().map(TransformationJobInfo::from_job),
        document: outcome.document,
    })))
}

async fn read_limited(
    mut field: Field<'_>,
    max_bytes: u64,
    max_mb: u64,
) -> Result<Vec<u8>, DocumentError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| DocumentError::Multipart(err.body_text()))?
    {
        if (bytes.len() + chunk.len()) as u64 > max_bytes {
            return Err(DocumentError::TooLarge { max_mb });
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_text(field: Field<'_>) -> Result<Option<String>, DocumentError> {
    let value = field
        .text()
        .await
        .map_err(|err| DocumentError::Multipart(err.body_text()))?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

/// Fetch a single document record.
pub(super) async fn get_document(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Document>>, ApiError> {
    let Path(raw) = id?;
    let id = parse_id(&raw)?;
    let document = state.documents.get_document(id).await?;
    Ok(Json(ApiResponse::success(document)))
}

/// Soft-remove a document: it disappears from lookups but its bytes are kept.
pub(super) async fn remove_document(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Document>>, ApiError> {
    let Path(raw) = id?;
    let document = state.documents.remove(parse_id(&raw)?).await?;
    Ok(Json(ApiResponse::success(document)))
}

/// Permanently remove a document, deleting its stored bytes.
pub(super) async fn permanent_remove_document(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Document>>, ApiError> {
    let Path(raw) = id?;
    let document = state.documents.permanent_remove(parse_id(&raw)?).await?;
    Ok(Json(ApiResponse::success(document)))
}

#[derive(Deserialize)]
pub(super) struct ListParams {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

/// List stored documents, newest first.
pub(super) async fn list_documents(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Document>>>, ApiError> {
    let Query(params) = params?;
    let documents = state
        .documents
        .list_documents(params.skip, params.limit)
        .await;
    Ok(Json(ApiResponse::success(documents)))
}

/// Report the state of one transformation job.
pub(super) async fn get_transformation_job(
    State(state): State<AppState>,
    job_id: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<TransformationJobView>>, ApiError> {
    let Path(raw) = job_id?;
    let job_id = parse_id(&raw)?;
    let job = state.documents.get_job(job_id).await?;
    Ok(Json(ApiResponse::success(job)))
}

#[derive(Deserialize)]
pub(super) struct JobIdsParams {
    #[serde(default)]
    job_ids: String,
}

/// Report several transformation jobs at once; unknown ids are listed separately.
pub(super) async fn get_transformation_jobs(
    State(state): State<AppState>,
    params: Result<Query<JobIdsParams>, QueryRejection>,
) -> Result<Json<ApiResponse<TransformationJobsView>>, ApiError> {
    let Query(params) = params?;
    let ids = parse_job_ids(&params.job_ids)?;
    let jobs = state.documents.get_jobs(&ids).await;
    Ok(Json(ApiResponse::success(jobs)))
}

fn parse_id(raw: &str) -> Result<Uuid, DocumentError> {
    Uuid::parse_str(raw.trim()).map_err(|_| DocumentError::InvalidId(raw.to_string()))
}

fn parse_job_ids(raw: &str) -> Result<Vec<Uuid>, DocumentError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_id)
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(DocumentError::EmptyJobIds);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_list_skips_blank_entries() {
        let id = Uuid::new_v4();
        let ids = parse_job_ids(&format!(" {id}, ,")).expect("ids");
        assert_eq!(ids, vec![id]);
    }

    #[test]
    fn whitespace_only_job_ids_are_rejected() {
        assert!(matches!(
            parse_job_ids("  , "),
            Err(DocumentError::EmptyJobIds)
        ));
    }

    #[test]
    fn any_invalid_job_id_rejects_the_list() {
        let id = Uuid::new_v4();
        assert!(matches!(
            parse_job_ids(&format!("{id},not-a-uuid")),
            Err(DocumentError::InvalidId(raw)) if raw == "not-a-uuid"
        ));
    }
}
