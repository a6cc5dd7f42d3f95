//! Provider abstraction for building and tearing down collection resources.

use crate::collections::types::CreationRequest;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by an LLM provider while building or removing collection resources.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No API key is configured for the provider.
    #[error("OpenAI API key is not configured")]
    MissingCredentials,
    /// Base URL failed to parse or normalize.
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with a non-success status.
    #[error("Error code: {} - {body}", .status.as_u16())]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },
    /// A vector store file batch ended in a non-completed state or with failed files.
    #[error(
        "Vector store file batch {batch_id} finished with status '{status}' ({failed} file(s) failed to process)"
    )]
    BatchFailed {
        /// Provider batch identifier.
        batch_id: String,
        /// Terminal batch status.
        status: String,
        /// Number of files the provider could not ingest.
        failed: u64,
    },
    /// A vector store file batch was still running after every poll.
    #[error("Vector store file batch {batch_id} did not finish after {attempts} polls")]
    BatchTimeout {
        /// Provider batch identifier.
        batch_id: String,
        /// Polls performed.
        attempts: u32,
    },
}

/// Document content handed to a provider for indexing.
#[derive(Debug, Clone)]
pub struct ProviderDocument {
    /// Local document identifier.
    pub id: Uuid,
    /// Filename sent with the upload.
    pub fname: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
}

/// Remote resources backing a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResources {
    /// Vector store holding the indexed files.
    pub vector_store_id: String,
    /// Assistant bound to the vector store, if requested.
    pub assistant_id: Option<String>,
    /// Uploaded file ids, in document order.
    pub file_ids: Vec<String>,
    /// Assistant id when present, otherwise the vector store id.
    pub llm_service_id: String,
    /// Assistant model, or the vector store service name.
    pub llm_service_name: String,
}

/// Interface implemented by collection providers.
///
/// `create` is all-or-nothing: on error every resource it created has already been removed.
#[async_trait]
pub trait CollectionProvider: Send + Sync {
    /// Provider name as accepted in creation requests.
    fn name(&self) -> &'static str;

    /// Upload `documents`, build a vector store and optionally an Assistant.
    async fn create(
        &self,
        request: &CreationRequest,
        documents: Vec<ProviderDocument>,
    ) -> Result<ProviderResources, ProviderError>;

    /// Remove the Assistant (if any) and the vector store of a collection.
    async fn delete(
        &self,
        vector_store_id: &str,
        assistant_id: Option<&str>,
    ) -> Result<(), ProviderError>;
}
