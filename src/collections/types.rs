//! Collection records, creation requests and job views.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Service name recorded for collections without an Assistant.
pub const VECTOR_STORE_SERVICE_NAME: &str = "openai vector store";

/// Errors raised by collection endpoints before a job runs.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// Exactly one of `model` / `instructions` was supplied.
    #[error(
        "To create an Assistant, provide BOTH 'model' and 'instructions'. \
         If you only want a vector store, remove both fields."
    )]
    IncompleteAssistantOptions,
    /// `batch_size` was zero.
    #[error("batch_size must be at least 1")]
    InvalidBatchSize,
    /// Requested provider is not supported.
    #[error("Unsupported provider '{0}'. Supported providers: openai")]
    UnsupportedProvider(String),
    /// Callback URL failed validation.
    #[error("{0}")]
    InvalidCallbackUrl(String),
    /// Identifier could not be parsed as a UUID.
    #[error("Invalid collection or job id '{0}': must be a valid UUID")]
    InvalidId(String),
    /// A referenced document does not exist.
    #[error("Document {0} not found")]
    DocumentNotFound(Uuid),
    /// Collection does not exist or was deleted.
    #[error("Collection {0} not found")]
    NotFound(Uuid),
    /// Collection job does not exist.
    #[error("Collection job {0} not found")]
    JobNotFound(Uuid),
    /// A deletion job for the collection is already running.
    #[error("Collection {0} is already being deleted")]
    DeletionInProgress(Uuid),
}

/// Body of `POST /collections`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreationRequest {
    /// Documents to index; duplicates are dropped keeping first occurrence.
    pub documents: Vec<Uuid>,
    /// Number of files attached per vector store batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Optional display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Assistant model; requires `instructions`.
    #[serde(default)]
    pub model: Option<String>,
    /// Assistant system prompt; requires `model`.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Assistant temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Where to report the job outcome.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// LLM provider name.
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_batch_size() -> usize {
    1
}

fn default_temperature() -> f64 {
    1e-6
}

fn default_provider() -> String {
    "openai".to_string()
}

impl CreationRequest {
    /// Apply normalisation and cross-field validation.
    pub fn normalize(mut self) -> Result<Self, CollectionError> {
        let mut seen = HashSet::new();
        self.documents.retain(|id| seen.insert(*id));

        self.model = trimmed(self.model);
        self.instructions = trimmed(self.instructions);
        if self.model.is_some() != self.instructions.is_some() {
            return Err(CollectionError::IncompleteAssistantOptions);
        }

        if self.batch_size == 0 {
            return Err(CollectionError::InvalidBatchSize);
        }

        self.provider = self.provider.trim().to_ascii_lowercase();
        if self.provider != "openai" {
            return Err(CollectionError::UnsupportedProvider(self.provider));
        }

        self.callback_url = trimmed(self.callback_url);
        Ok(self)
    }

    /// Whether an Assistant should be created on top of the vector store.
    pub fn with_assistant(&self) -> bool {
        self.model.is_some() && self.instructions.is_some()
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Kind of work a collection job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionActionType {
    /// Build provider resources and persist the collection.
    Create,
    /// Remove provider resources and soft-delete the collection.
    Delete,
}

/// Lifecycle of a collection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionJobStatus {
    /// Accepted, not yet running.
    Pending,
    /// Background work in progress.
    Processing,
    /// Work finished.
    Successful,
    /// Work failed; see `error_message`.
    Failed,
}

/// Persistent state of a collection job.
#[derive(Debug, Clone)]
pub struct CollectionJob {
    /// Job identifier.
    pub id: Uuid,
    /// Create or delete.
    pub action_type: CollectionActionType,
    /// Current lifecycle state.
    pub status: CollectionJobStatus,
    /// Collection created or targeted by the job.
    pub collection_id: Option<Uuid>,
    /// Failure description once failed.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub inserted_at: OffsetDateTime,
    /// Last modification timestamp.
    pub updated_at: OffsetDateTime,
}

/// A vector store (optionally fronted by an Assistant) built from documents.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    /// Collection identifier.
    pub id: Uuid,
    /// LLM provider that owns the remote resources.
    pub provider: String,
    /// Assistant id when one exists, otherwise the vector store id.
    pub llm_service_id: String,
    /// Assistant model, or `openai vector store`.
    pub llm_service_name: String,
    /// Remote vector store id.
    pub vector_store_id: String,
    /// Remote Assistant id, if created.
    pub assistant_id: Option<String>,
    /// Optional display name.
    pub name: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Documents indexed into the collection.
    #[serde(skip)]
    pub document_ids: Vec<Uuid>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Soft-delete timestamp.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    /// Set while a deletion job owns the collection; cleared if that job fails.
    #[serde(skip)]
    pub deleting: bool,
}

/// Collection plus the documents it was built from.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionDetails {
    /// The collection record.
    #[serde(flatten)]
    pub collection: Collection,
    /// Indexed documents.
    pub documents: Vec<crate::documents::Document>,
}

/// Collection reference embedded in a job view.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobCollection {
    /// Full record, used by creation jobs.
    Full(Collection),
    /// Identifier only, used by deletion jobs.
    Id {
        /// Collection identifier.
        id: Uuid,
    },
}

/// Public view of a collection job, also used as callback payload data.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionJobView {
    /// Job identifier.
    pub job_id: Uuid,
    /// Create or delete.
    pub action_type: CollectionActionType,
    /// Current lifecycle state.
    pub status: CollectionJobStatus,
    /// Failure description once failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp of the job.
    #[serde(with = "time::serde::rfc3339")]
    pub job_inserted_at: OffsetDateTime,
    /// Last modification timestamp of the job.
    #[serde(with = "time::serde::rfc3339")]
    pub job_updated_at: OffsetDateTime,
    /// Collection affected by the job, once known.
    pub collection: Option<JobCollection>,
}

impl CollectionJobView {
    /// Build a view of `job` with an optional embedded collection.
    pub fn new(job: &CollectionJob, collection: Option<JobCollection>) -> Self {
        Self {
            job_id: job.id,
            action_type: job.action_type,
            status: job.status,
            error_message: job.error_message.clone(),
            job_inserted_at: job.inserted_at,
            job_updated_at: job.updated_at,
            collection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: serde_json::Value) -> Result<CreationRequest, CollectionError> {
        serde_json::from_value::<CreationRequest>(body)
            .expect("deserialize")
            .normalize()
    }

    #[test]
    fn applies_defaults_and_dedupes_documents() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let request = request(json!({ "documents": [id, other, id] })).expect("valid");
        assert_eq!(request.documents, vec![id, other]);
        assert_eq!(request.batch_size, 1);
        assert_eq!(request.temperature, 1e-6);
        assert_eq!(request.provider, "openai");
        assert!(!request.with_assistant());
    }

    #[test]
    fn blank_assistant_fields_count_as_absent() {
        let request = request(json!({
            "documents": [],
            "model": "   ",
            "instructions": ""
        }))
        .expect("valid");
        assert!(request.model.is_none());
        assert!(!request.with_assistant());
    }

    #[test]
    fn requires_both_assistant_fields() {
        let error = request(json!({ "documents": [], "model": "gpt-4o" }))
            .expect_err("model without instructions");
        assert_eq!(
            error.to_string(),
            "To create an Assistant, provide BOTH 'model' and 'instructions'. \
             If you only want a vector store, remove both fields."
        );

        let error = request(json!({ "documents": [], "instructions": "be brief" }))
            .expect_err("instructions without model");
        assert!(matches!(error, CollectionError::IncompleteAssistantOptions));
    }

    #[test]
    fn trims_assistant_fields() {
        let request = request(json!({
            "documents": [],
            "model": " gpt-4o ",
            "instructions": " answer from the files "
        }))
        .expect("valid");
        assert_eq!(request.model.as_deref(), Some("gpt-4o"));
        assert_eq!(request.instructions.as_deref(), Some("answer from the files"));
        assert!(request.with_assistant());
    }

    #[test]
    fn rejects_zero_batch_and_unknown_provider() {
        assert!(matches!(
            request(json!({ "documents": [], "batch_size": 0 })),
            Err(CollectionError::InvalidBatchSize)
        ));
        assert!(matches!(
            request(json!({ "documents": [], "provider": "bedrock" })),
            Err(CollectionError::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn pending_view_serializes_null_collection() {
        let now = OffsetDateTime::now_utc();
        let job = CollectionJob {
            id: Uuid::nil(),
            action_type: CollectionActionType::Create,
            status: CollectionJobStatus::Pending,
            collection_id: None,
            error_message: None,
            inserted_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(CollectionJobView::new(&job, None)).expect("json");
        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["action_type"], "CREATE");
        assert!(value["collection"].is_null());
        assert!(value.get("error_message").is_none());
        assert!(value.get("job_inserted_at").is_some());
    }
}
