use crate::{
    collections::CollectionError, documents::DocumentError, evaluations::EvaluationError,
    response::ApiResponse,
};
use axum::{
    Json,
    extract::multipart::MultipartRejection,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Failure rendered as the `{"success": false, ...}` envelope with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status returned to the client.
    pub status: StatusCode,
    /// Message placed in the envelope's `error` field.
    pub message: String,
}

impl ApiError {
    /// Build an error from a status and message.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 422 for malformed path or query input.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.message, "Request rejected");
        }
        (self.status, Json(ApiResponse::failure(self.message))).into_response()
    }
}

impl From<DocumentError> for ApiError {
    fn from(error: DocumentError) -> Self {
        let status = match &error {
            DocumentError::MissingFile
            | DocumentError::MissingFilename
            | DocumentError::Empty
            | DocumentError::InvalidCallbackUrl(_)
            | DocumentError::InvalidId(_)
            | DocumentError::EmptyJobIds => StatusCode::UNPROCESSABLE_ENTITY,
            DocumentError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DocumentError::Multipart(_)
            | DocumentError::UnsupportedExtension(_)
            | DocumentError::UnknownTargetFormat(_)
            | DocumentError::UnsupportedTransformation { .. }
            | DocumentError::UnknownTransformer { .. }
            | DocumentError::TransformerWithoutTarget => StatusCode::BAD_REQUEST,
            DocumentError::NotFound(_) | DocumentError::JobNotFound(_) => StatusCode::NOT_FOUND,
            DocumentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<CollectionError> for ApiError {
    fn from(error: CollectionError) -> Self {
        let status = match &error {
            CollectionError::IncompleteAssistantOptions
            | CollectionError::InvalidBatchSize
            | CollectionError::UnsupportedProvider(_)
            | CollectionError::InvalidCallbackUrl(_)
            | CollectionError::InvalidId(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CollectionError::DocumentNotFound(_)
            | CollectionError::NotFound(_)
            | CollectionError::JobNotFound(_) => StatusCode::NOT_FOUND,
            CollectionError::DeletionInProgress(_) => StatusCode::CONFLICT,
        };
        Self::new(status, error.to_string())
    }
}

impl From<EvaluationError> for ApiError {
    fn from(error: EvaluationError) -> Self {
        let status = match &error {
            EvaluationError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            EvaluationError::UnknownExportFormat(_)
            | EvaluationError::InvalidRequest(_)
            | EvaluationError::UnknownStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EvaluationError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        Self::new(status, error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        DocumentError::Multipart(rejection.body_text()).into()
    }
}
