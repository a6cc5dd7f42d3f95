//! HTTP surface for docrag.
//!
//! Three endpoint families share one router and one JSON envelope:
//!
//! - `/documents` – multipart upload (with optional `pdf → markdown` transformation), document
//!   listing, lookup and removal, transformation job status.
//! - `/collections` – asynchronous vector store / Assistant creation and deletion, job polling,
//!   collection listing and lookup.
//! - `/evaluations` – evaluation runs and their trace scores, synced from Langfuse on demand.
//!
//! `GET /metrics`, `GET /commands` and `GET /health` cover observability and discovery.

mod collections;
mod documents;
mod error;
mod evaluations;

pub use error::ApiError;

use crate::{
    callback::CallbackSender,
    collections::{CollectionProvider, CollectionService, OpenAiProvider},
    config::Config,
    documents::{DocumentService, LocalStorage},
    evaluations::{EvaluationService, LangfuseClient, TraceStore},
    metrics::{MetricsSnapshot, ServiceMetrics},
    response::ApiResponse,
    transform::TransformerRegistry,
};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{delete, get, post},
};
use serde::Serialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Uploads, storage and transformation jobs.
    pub documents: DocumentService,
    /// Vector store collections and their jobs.
    pub collections: CollectionService,
    /// Evaluation runs and trace scores.
    pub evaluations: EvaluationService,
    /// Counters exposed on `/metrics`.
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Wire the default collaborators (local storage, OpenAI, Langfuse) from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let metrics = Arc::new(ServiceMetrics::new());
        let callbacks = CallbackSender::new(
            Duration::from_secs(config.callback_connect_timeout_secs),
            Duration::from_secs(config.callback_read_timeout_secs),
            config.callback_policy(),
        )
        .context("failed to build callback client")?;

        let provider: Arc<dyn CollectionProvider> = Arc::new(
            OpenAiProvider::from_config(config).context("failed to build OpenAI client")?,
        );
        let traces: Arc<dyn TraceStore> = Arc::new(
            LangfuseClient::from_config(config).context("failed to build Langfuse client")?,
        );

        let documents = DocumentService::new(
            Arc::new(LocalStorage::new(config.document_storage_dir.clone())),
            Arc::new(TransformerRegistry::default()),
            callbacks.clone(),
            metrics.clone(),
            config.max_document_upload_bytes(),
        );
        let collections =
            CollectionService::new(documents.clone(), provider, callbacks, metrics.clone());
        let evaluations = EvaluationService::new(traces, metrics.clone());

        Ok(Self {
            documents,
            collections,
            evaluations,
            metrics,
        })
    }
}

/// Build the HTTP router exposing the full API surface.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/documents/upload",
            post(documents::upload_document).layer(DefaultBodyLimit::disable()),
        )
        .route("/documents", get(documents::list_documents))
        .route(
            "/documents/transformation",
            get(documents::get_transformation_jobs),
        )
        .route(
            "/documents/transformation/:job_id",
            get(documents::get_transformation_job),
        )
        .route(
            "/documents/:id",
            get(documents::get_document).delete(documents::remove_document),
        )
        .route(
            "/documents/:id/permanent",
            delete(documents::permanent_remove_document),
        )
        .route(
            "/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/collections/jobs/:job_id",
            get(collections::get_collection_job),
        )
        .route(
            "/collections/:id",
            get(collections::get_collection).delete(collections::delete_collection),
        )
        .route(
            "/evaluations",
            get(evaluations::list_evaluations).post(evaluations::create_evaluation),
        )
        .route(
            "/evaluations/:id",
            get(evaluations::get_evaluation).patch(evaluations::update_evaluation),
        )
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .route("/health", get(health))
        .with_state(state)
}

/// Return a snapshot of upload, job and sync counters.
async fn get_metrics(State(state): State<AppState>) -> Json<ApiResponse<MetricsSnapshot>> {
    Json(ApiResponse::success(state.metrics.snapshot()))
}

async fn health() -> Json<bool> {
    Json(true)
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload_document",
                method: "POST",
                path: "/documents/upload",
                description: "Multipart upload of a `src` file. Optional `target_format`, `transformer` and `callback_url` fields schedule a background transformation (pdf → markdown via zerox).",
                request_example: None,
            },
            CommandDescriptor {
                name: "list_documents",
                method: "GET",
                path: "/documents?skip=0&limit=100",
                description: "List stored documents, newest first.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_document",
                method: "GET",
                path: "/documents/{id}",
                description: "Return one stored document.",
                request_example: None,
            },
            CommandDescriptor {
                name: "remove_document",
                method: "DELETE",
                path: "/documents/{id}",
                description: "Soft-delete a document; it is hidden from lookups but its bytes are kept.",
                request_example: None,
            },
            CommandDescriptor {
                name: "permanent_remove_document",
                method: "DELETE",
                path: "/documents/{id}/permanent",
                description: "Delete a document's stored bytes and mark it deleted.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_transformation_job",
                method: "GET",
                path: "/documents/transformation/{job_id}",
                description: "Return the status of a transformation job and the id of its output document.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_transformation_jobs",
                method: "GET",
                path: "/documents/transformation?job_ids=a,b",
                description: "Return several transformation jobs; unknown ids are listed under `jobs_not_found`.",
                request_example: None,
            },
            CommandDescriptor {
                name: "create_collection",
                method: "POST",
                path: "/collections",
                description: "Build an OpenAI vector store from uploaded documents, optionally with an Assistant. Runs in the background; poll the returned job or pass `callback_url`.",
                request_example: Some(json!({
                    "documents": ["5f0c3c8e-9a55-4c39-9d0f-0d3c8f1f2b7a"],
                    "batch_size": 1,
                    "model": "gpt-4o",
                    "instructions": "Answer using the attached documents.",
                    "callback_url": "https://example.org/hooks/collections"
                })),
            },
            CommandDescriptor {
                name: "get_collection_job",
                method: "GET",
                path: "/collections/jobs/{job_id}",
                description: "Return a collection job; the collection is embedded once the job succeeds.",
                request_example: None,
            },
            CommandDescriptor {
                name: "list_collections",
                method: "GET",
                path: "/collections",
                description: "List active collections.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_collection",
                method: "GET",
                path: "/collections/{id}",
                description: "Return an active collection with its documents.",
                request_example: None,
            },
            CommandDescriptor {
                name: "delete_collection",
                method: "DELETE",
                path: "/collections/{id}",
                description: "Remove the collection's Assistant and vector store in the background, then soft-delete it.",
                request_example: None,
            },
            CommandDescriptor {
                name: "create_evaluation",
                method: "POST",
                path: "/evaluations",
                description: "Register an evaluation run against a Langfuse dataset.",
                request_example: Some(json!({
                    "run_name": "nightly-2024-06-01",
                    "dataset_name": "qa-set",
                    "config": { "model": "gpt-4o" },
                    "total_items": 100
                })),
            },
            CommandDescriptor {
                name: "list_evaluations",
                method: "GET",
                path: "/evaluations?limit=50&offset=0",
                description: "List evaluation runs, newest first, without score payloads.",
                request_example: None,
            },
            CommandDescriptor {
                name: "get_evaluation",
                method: "GET",
                path: "/evaluations/{id}?get_trace_info=true&resync_score=false&export_format=row",
                description: "Return a run; with get_trace_info=true also its trace scores and summaries (grouped by question with export_format=grouped).",
                request_example: None,
            },
            CommandDescriptor {
                name: "update_evaluation",
                method: "PATCH",
                path: "/evaluations/{id}",
                description: "Report run progress or status from the batch runner.",
                request_example: Some(json!({
                    "status": "completed",
                    "processed_items": 100
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return upload, job and trace-sync counters.",
                request_example: None,
            },
        ],
    })
}
