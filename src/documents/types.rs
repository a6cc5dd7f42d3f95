//! Document records, transformation jobs and their error type.

use crate::documents::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors emitted by the document upload and transformation pipeline.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Multipart body did not contain the `src` file part.
    #[error("Missing 'src' file part")]
    MissingFile,
    /// File part was sent without a filename.
    #[error("File must have a filename")]
    MissingFilename,
    /// Upload exceeded the configured ceiling.
    #[error("File too large. Maximum size: {max_mb}MB")]
    TooLarge {
        /// Configured ceiling in MiB.
        max_mb: u64,
    },
    /// Upload contained zero bytes.
    #[error("Empty file uploaded")]
    Empty,
    /// Multipart body could not be decoded.
    #[error("Malformed multipart body: {0}")]
    Multipart(String),
    /// File extension does not map to a known format.
    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),
    /// Requested target format is unknown.
    #[error("Unsupported target format: {0}")]
    UnknownTargetFormat(String),
    /// No transformer converts between the two formats.
    #[error("Transformation from {from} to {to} is not supported")]
    UnsupportedTransformation {
        /// Detected source format.
        from: DocumentFormat,
        /// Requested target format.
        to: DocumentFormat,
    },
    /// Requested transformer is not registered for the conversion.
    #[error("Transformer '{name}' not available. Available transformers: {available}")]
    UnknownTransformer {
        /// Transformer requested by the caller.
        name: String,
        /// Comma-separated transformers valid for the conversion.
        available: String,
    },
    /// A transformer was named without a target format.
    #[error("'transformer' requires 'target_format'")]
    TransformerWithoutTarget,
    /// Callback URL failed validation.
    #[error("{0}")]
    InvalidCallbackUrl(String),
    /// Identifier could not be parsed as a UUID.
    #[error("Invalid document or job id '{0}': must be a valid UUID")]
    InvalidId(String),
    /// A job id list query contained no ids.
    #[error("job_ids must contain at least one valid UUID")]
    EmptyJobIds,
    /// Document does not exist.
    #[error("Document {0} not found")]
    NotFound(Uuid),
    /// Transformation job does not exist.
    #[error("Transformation job {0} not found")]
    JobNotFound(Uuid),
    /// Object storage failed.
    #[error("Document storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// File formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML document.
    Docx,
    /// Legacy Word document.
    Doc,
    /// Office Open XML presentation.
    Pptx,
    /// Plain text.
    Text,
    /// Markdown.
    Markdown,
    /// HTML.
    Html,
}

impl DocumentFormat {
    /// Map a file extension (without dot, any case) to a format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "pptx" => Some(Self::Pptx),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }

    /// Detect the format of an uploaded filename.
    pub fn from_filename(fname: &str) -> Result<Self, DocumentError> {
        let extension = fname
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && !ext.contains('/'))
            .ok_or_else(|| DocumentError::UnsupportedExtension("(none)".to_string()))?;
        Self::from_extension(extension)
            .ok_or_else(|| DocumentError::UnsupportedExtension(format!(".{extension}")))
    }

    /// Extension used for files produced in this format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Pptx => "pptx",
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Html => "html",
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Pptx => "pptx",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "doc" => Ok(Self::Doc),
            "pptx" => Ok(Self::Pptx),
            "text" | "txt" => Ok(Self::Text),
            "markdown" | "md" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            other => Err(DocumentError::UnknownTargetFormat(other.to_string())),
        }
    }
}

/// Stored document record.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Identifier assigned on upload.
    pub id: Uuid,
    /// Filename as supplied by the uploader.
    pub fname: String,
    /// Location of the stored bytes.
    pub object_store_url: String,
    /// Key of the stored bytes inside the object store.
    #[serde(skip)]
    pub object_key: String,
    /// Hex-encoded SHA-256 of the content.
    pub checksum: String,
    /// Content length in bytes.
    pub size_bytes: u64,
    /// Document this one was transformed from, if any.
    pub source_document_id: Option<Uuid>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Set by a soft or permanent removal; hidden from lookups afterwards.
    pub is_deleted: bool,
    /// When the stored bytes were purged by a permanent removal.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// Lifecycle of a transformation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationStatus {
    /// Created, not yet picked up.
    Pending,
    /// Transformer running.
    Processing,
    /// Output document stored.
    Completed,
    /// Transformer or storage failed.
    Failed,
}

/// Background conversion of one document into another format.
#[derive(Debug, Clone)]
pub struct TransformationJob {
    /// Job identifier.
    pub id: Uuid,
    /// Document being converted.
    pub source_document_id: Uuid,
    /// Transformer name.
    pub transformer: String,
    /// Requested output format.
    pub target_format: DocumentFormat,
    /// Current lifecycle state.
    pub status: TransformationStatus,
    /// Output document once completed.
    pub transformed_document_id: Option<Uuid>,
    /// Failure description once failed.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub inserted_at: OffsetDateTime,
    /// Last modification timestamp.
    pub updated_at: OffsetDateTime,
}

/// Validated transformation request attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationPlan {
    /// Detected source format.
    pub source_format: DocumentFormat,
    /// Requested output format.
    pub target_format: DocumentFormat,
    /// Resolved transformer name.
    pub transformer: String,
}

/// Public view of a transformation job.
#[derive(Debug, Clone, Serialize)]
pub struct TransformationJobView {
    /// Job identifier.
    pub job_id: Uuid,
    /// Document being converted.
    pub source_document_id: Uuid,
    /// Current lifecycle state.
    pub status: TransformationStatus,
    /// Transformer name.
    pub transformer: String,
    /// Requested output format.
    pub target_format: DocumentFormat,
    /// Failure description once failed.
    pub error_message: Option<String>,
    /// Output document once completed.
    pub transformed_document: Option<Document>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Result of a multi-job lookup.
#[derive(Debug, Clone, Serialize)]
pub struct TransformationJobsView {
    /// Jobs that were found.
    pub jobs: Vec<TransformationJobView>,
    /// Requested identifiers without a job.
    pub jobs_not_found: Vec<Uuid>,
}

/// Summary of the transformation job created by an upload.
#[derive(Debug, Clone, Serialize)]
pub struct TransformationJobInfo {
    /// Job identifier.
    pub job_id: Uuid,
    /// Initial job status.
    pub status: TransformationStatus,
    /// Transformer name.
    pub transformer: String,
    /// Relative URL for polling the job.
    pub status_check_url: String,
    /// Human-readable note.
    pub message: String,
}

impl TransformationJobInfo {
    /// Build the upload-response summary for a freshly created job.
    pub fn from_job(job: &TransformationJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            transformer: job.transformer.clone(),
            status_check_url: format!("/documents/transformation/{}", job.id),
            message: format!(
                "Transformation to {} scheduled. Poll the status_check_url for progress.",
                job.target_format
            ),
        }
    }
}

/// Response body of a successful upload.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentUploadResponse {
    /// Stored document.
    #[serde(flatten)]
    pub document: Document,
    /// Transformation job created alongside the upload, if requested.
    pub transformation_job: Option<TransformationJobInfo>,
}
