//! Document service: storage, records, and background transformation jobs.

use crate::{
    callback::CallbackSender,
    documents::{
        storage::{DocumentStorage, object_key},
        types::{
            Document, DocumentError, TransformationJob, TransformationJobView,
            TransformationJobsView, TransformationPlan, TransformationStatus,
        },
    },
    metrics::ServiceMetrics,
    response::ApiResponse,
    store::{MemoryStore, now},
    transform::{TransformError, TransformerRegistry},
};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// A validated upload ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewUpload {
    /// Filename as supplied by the uploader.
    pub fname: String,
    /// File content (non-empty, within the size ceiling).
    pub bytes: Vec<u8>,
    /// Transformation to schedule after storing.
    pub plan: Option<TransformationPlan>,
    /// Where to report the transformation result.
    pub callback_url: Option<Url>,
}

/// Stored document plus the job created for it.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// The stored document.
    pub document: Document,
    /// Transformation job, when one was requested.
    pub job: Option<TransformationJob>,
}

/// Owns document records, the object store and the transformer registry.
///
/// Cloning is cheap; background jobs hold their own clone.
#[derive(Clone)]
pub struct DocumentService {
    documents: Arc<MemoryStore<Uuid, Document>>,
    jobs: Arc<MemoryStore<Uuid, TransformationJob>>,
    storage: Arc<dyn DocumentStorage>,
    registry: Arc<TransformerRegistry>,
    callbacks: CallbackSender,
    metrics: Arc<ServiceMetrics>,
    max_upload_bytes: u64,
}

impl DocumentService {
    /// Assemble the service from its collaborators.
    pub fn new(
        storage: Arc<dyn DocumentStorage>,
        registry: Arc<TransformerRegistry>,
        callbacks: CallbackSender,
        metrics: Arc<ServiceMetrics>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            documents: Arc::new(MemoryStore::new()),
            jobs: Arc::new(MemoryStore::new()),
            storage,
            registry,
            callbacks,
            metrics,
            max_upload_bytes,
        }
    }

    /// Upload ceiling in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Upload ceiling in whole MiB, as reported to clients.
    pub fn max_upload_mb(&self) -> u64 {
        self.max_upload_bytes / (1024 * 1024)
    }

    /// Validate the transformation parameters of an upload.
    pub fn plan_transformation(
        &self,
        fname: &str,
        target_format: Option<&str>,
        transformer: Option<&str>,
    ) -> Result<Option<TransformationPlan>, DocumentError> {
        self.registry.plan(fname, target_format, transformer)
    }

    /// Store an upload and schedule its transformation, if any.
    pub async fn upload(&self, upload: NewUpload) -> Result<UploadOutcome, DocumentError> {
        let NewUpload {
            fname,
            bytes,
            plan,
            callback_url,
        } = upload;

        let document = self.store_document(fname, &bytes, None).await?;
        self.metrics.record_upload(document.size_bytes);
        tracing::info!(
            document_id = %document.id,
            fname = %document.fname,
            size_bytes = document.size_bytes,
            "Document uploaded"
        );

        let job = match plan {
            Some(plan) => Some(self.start_transformation(&document, plan, callback_url).await),
            None => None,
        };

        Ok(UploadOutcome { document, job })
    }

    /// Validate an optional upload callback URL against the callback policy.
    pub async fn callback_url(&self, raw: Option<&str>) -> Result<Option<Url>, DocumentError> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(None);
        };
        self.callbacks
            .validate(raw)
            .await
            .map(Some)
            .map_err(|err| DocumentError::InvalidCallbackUrl(err.to_string()))
    }

    /// Fetch one document that has not been removed.
    pub async fn get_document(&self, id: Uuid) -> Result<Document, DocumentError> {
        self.documents
            .get(&id)
            .await
            .filter(|document| !document.is_deleted)
            .ok_or(DocumentError::NotFound(id))
    }

    /// Whether a document exists and has not been removed.
    pub async fn contains(&self, id: Uuid) -> bool {
        self.get_document(id).await.is_ok()
    }

    /// Soft removal: the record and its bytes are kept but no longer listed or served.
    pub async fn remove(&self, id: Uuid) -> Result<Document, DocumentError> {
        let removed = self
            .documents
            .update_if(
                &id,
                |document| !document.is_deleted,
                |document| {
                    document.is_deleted = true;
                    document.updated_at = now();
                },
            )
            .await
            .ok_or(DocumentError::NotFound(id))?;
        tracing::info!(document_id = %id, "Document removed");
        Ok(removed)
    }

    /// Permanent removal: the stored bytes are deleted and `deleted_at` is set.
    ///
    /// Soft-removed documents can still be purged; purged ones are not found.
    pub async fn permanent_remove(&self, id: Uuid) -> Result<Document, DocumentError> {
        let document = self
            .documents
            .get(&id)
            .await
            .filter(|document| document.deleted_at.is_none())
            .ok_or(DocumentError::NotFound(id))?;
        self.storage.delete(&document.object_key).await?;
        let purged = self
            .documents
            .update_if(
                &id,
                |document| document.deleted_at.is_none(),
                |document| {
                    let timestamp = now();
                    document.is_deleted = true;
                    document.deleted_at = Some(timestamp);
                    document.updated_at = timestamp;
                },
            )
            .await
            .ok_or(DocumentError::NotFound(id))?;
        tracing::info!(document_id = %id, key = %document.object_key, "Document purged");
        Ok(purged)
    }

    /// Read the stored bytes of a document.
    pub async fn read_content(&self, document: &Document) -> Result<Vec<u8>, DocumentError> {
        Ok(self.storage.get(&document.object_key).await?)
    }

    /// List documents, newest first.
    pub async fn list_documents(&self, skip: usize, limit: usize) -> Vec<Document> {
        let mut documents = self.documents.values().await;
        documents.retain(|document| !document.is_deleted);
        documents.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at).then(a.id.cmp(&b.id)));
        documents.into_iter().skip(skip).take(limit).collect()
    }

    /// Public view of one transformation job.
    pub async fn get_job(&self, id: Uuid) -> Result<TransformationJobView, DocumentError> {
        let job = self
            .jobs
            .get(&id)
            .await
            .ok_or(DocumentError::JobNotFound(id))?;
        Ok(self.job_view(job).await)
    }

    /// Public views of several jobs, reporting ids that do not exist.
    pub async fn get_jobs(&self, ids: &[Uuid]) -> TransformationJobsView {
        let mut jobs = Vec::new();
        let mut jobs_not_found = Vec::new();
        for id in ids {
            match self.jobs.get(id).await {
                Some(job) => jobs.push(self.job_view(job).await),
                None => jobs_not_found.push(*id),
            }
        }
        TransformationJobsView {
            jobs,
            jobs_not_found,
        }
    }

    async fn job_view(&self, job: TransformationJob) -> TransformationJobView {
        let transformed_document = match job.transformed_document_id {
            Some(id) => self.get_document(id).await.ok(),
            None => None,
        };
        TransformationJobView {
            job_id: job.id,
            source_document_id: job.source_document_id,
            status: job.status,
            transformer: job.transformer,
            target_format: job.target_format,
            error_message: job.error_message,
            transformed_document,
            inserted_at: job.inserted_at,
            updated_at: job.updated_at,
        }
    }

    async fn store_document(
        &self,
        fname: String,
        bytes: &[u8],
        source_document_id: Option<Uuid>,
    ) -> Result<Document, DocumentError> {
        let id = Uuid::new_v4();
        let key = object_key(&id, &fname);
        let object_store_url = self.storage.put(&key, bytes).await?;
        let timestamp = now();
        let document = Document {
            id,
            fname,
            object_store_url,
            object_key: key,
            checksum: hex::encode(Sha256::digest(bytes)),
            size_bytes: bytes.len() as u64,
            source_document_id,
            inserted_at: timestamp,
            updated_at: timestamp,
            is_deleted: false,
            deleted_at: None,
        };
        self.documents.insert(id, document.clone()).await;
        Ok(document)
    }

    async fn start_transformation(
        &self,
        document: &Document,
        plan: TransformationPlan,
        callback_url: Option<Url>,
    ) -> TransformationJob {
        let timestamp = now();
        let job = TransformationJob {
            id: Uuid::new_v4(),
            source_document_id: document.id,
            transformer: plan.transformer,
            target_format: plan.target_format,
            status: TransformationStatus::Pending,
            transformed_document_id: None,
            error_message: None,
            inserted_at: timestamp,
            updated_at: timestamp,
        };
        self.jobs.insert(job.id, job.clone()).await;
        tracing::info!(
            job_id = %job.id,
            document_id = %document.id,
            transformer = %job.transformer,
            target_format = %job.target_format,
            "Transformation job scheduled"
        );

        let service = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            service.execute_transformation(job_id, callback_url).await;
        });
        job
    }

    /// Run a transformation job to completion and deliver its callback.
    pub async fn execute_transformation(&self, job_id: Uuid, callback_url: Option<Url>) {
        let Some(job) = self
            .set_job_state(job_id, TransformationStatus::Processing, None, None)
            .await
        else {
            tracing::warn!(job_id = %job_id, "Transformation job vanished before execution");
            return;
        };

        let outcome = self.run_transformation(&job).await;
        let succeeded = outcome.is_ok();
        let finished = match outcome {
            Ok(output) => {
                tracing::info!(
                    job_id = %job_id,
                    transformed_document_id = %output.id,
                    "Transformation completed"
                );
                self.set_job_state(job_id, TransformationStatus::Completed, Some(output.id), None)
                    .await
            }
            Err(error) => {
                tracing::error!(job_id = %job_id, error = %error, "Transformation failed");
                self.set_job_state(
                    job_id,
                    TransformationStatus::Failed,
                    None,
                    Some(error.to_string()),
                )
                .await
            }
        };
        self.metrics.record_transformation(succeeded);

        if let (Some(url), Some(job)) = (callback_url, finished) {
            let view = self.job_view(job).await;
            let payload = match &view.error_message {
                Some(error) => ApiResponse::failure_with_data(error.clone(), view.clone()),
                None => ApiResponse::success(view.clone()),
            };
            self.callbacks.notify(&url, &payload).await;
        }
    }

    async fn run_transformation(
        &self,
        job: &TransformationJob,
    ) -> Result<Document, TransformationFailure> {
        let source = self.get_document(job.source_document_id).await?;
        let transformer = self
            .registry
            .get(&job.transformer)
            .ok_or_else(|| TransformationFailure::MissingTransformer(job.transformer.clone()))?;
        let input = self.read_content(&source).await?;
        let rendered = transformer.transform(input, job.target_format).await?;

        let fname = transformed_fname(&source.fname, job.target_format.extension());
        Ok(self
            .store_document(fname, rendered.as_bytes(), Some(source.id))
            .await?)
    }

    async fn set_job_state(
        &self,
        job_id: Uuid,
        status: TransformationStatus,
        transformed_document_id: Option<Uuid>,
        error_message: Option<String>,
    ) -> Option<TransformationJob> {
        self.jobs
            .update(&job_id, |job| {
                job.status = status;
                if transformed_document_id.is_some() {
                    job.transformed_document_id = transformed_document_id;
                }
                if error_message.is_some() {
                    job.error_message = error_message;
                }
                job.updated_at = now();
            })
            .await
    }
}

#[derive(Debug, thiserror::Error)]
enum TransformationFailure {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("Transformer '{0}' is not registered")]
    MissingTransformer(String),
}

/// Name of the document produced by a transformation: `{stem}<transformed>.{ext}`.
pub fn transformed_fname(source_fname: &str, extension: &str) -> String {
    let base = source_fname
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_fname);
    let stem = base
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(base);
    format!("{stem}<transformed>.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackPolicy;
    use crate::documents::{DocumentFormat, LocalStorage};
    use crate::transform::Transformer;
    use async_trait::async_trait;
    use std::time::Duration;

    struct UppercaseTransformer;

    #[async_trait]
    impl Transformer for UppercaseTransformer {
        fn name(&self) -> &'static str {
            "upper"
        }

        async fn transform(
            &self,
            input: Vec<u8>,
            _target: DocumentFormat,
        ) -> Result<String, TransformError> {
            let text = String::from_utf8_lossy(&input).to_uppercase();
            if text.trim().is_empty() {
                return Err(TransformError::NoText);
            }
            Ok(text)
        }
    }

    fn service(dir: &std::path::Path) -> DocumentService {
        let registry = TransformerRegistry::empty().register(
            DocumentFormat::Text,
            DocumentFormat::Markdown,
            Arc::new(UppercaseTransformer),
        );
        DocumentService::new(
            Arc::new(LocalStorage::new(dir)),
            Arc::new(registry),
            CallbackSender::new(
                Duration::from_secs(1),
                Duration::from_secs(1),
                CallbackPolicy::PublicHttpsOnly,
            )
            .expect("sender"),
            Arc::new(ServiceMetrics::new()),
            1024,
        )
    }

    async fn wait_for_terminal(service: &DocumentService, job_id: Uuid) -> TransformationJobView {
        for _ in 0..100 {
            let view = service.get_job(job_id).await.expect("job");
            if matches!(
                view.status,
                TransformationStatus::Completed | TransformationStatus::Failed
            ) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[test]
    fn transformed_names_carry_the_marker_and_extension() {
        assert_eq!(
            transformed_fname("/tmp/report.pdf", "md"),
            "report<transformed>.md"
        );
        assert_eq!(transformed_fname("README", "txt"), "README<transformed>.txt");
    }

    #[tokio::test]
    async fn upload_without_plan_creates_no_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());

        let outcome = service
            .upload(NewUpload {
                fname: "notes.txt".into(),
                bytes: b"hello".to_vec(),
                plan: None,
                callback_url: None,
            })
            .await
            .expect("upload");

        assert!(outcome.job.is_none());
        assert_eq!(outcome.document.size_bytes, 5);
        assert_eq!(
            outcome.document.checksum,
            hex::encode(Sha256::digest(b"hello"))
        );
        let stored = service.get_document(outcome.document.id).await.expect("doc");
        assert_eq!(
            service.read_content(&stored).await.expect("bytes"),
            b"hello"
        );
    }

    #[tokio::test]
    async fn transformation_produces_a_linked_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());
        let plan = service
            .plan_transformation("notes.txt", Some("markdown"), Some("upper"))
            .expect("plan");

        let outcome = service
            .upload(NewUpload {
                fname: "notes.txt".into(),
                bytes: b"hello world".to_vec(),
                plan,
                callback_url: None,
            })
            .await
            .expect("upload");
        let job = outcome.job.expect("job scheduled");
        assert_eq!(job.status, TransformationStatus::Pending);

        let view = wait_for_terminal(&service, job.id).await;
        assert_eq!(view.status, TransformationStatus::Completed);
        let transformed = view.transformed_document.expect("output document");
        assert_eq!(transformed.fname, "notes<transformed>.md");
        assert_eq!(transformed.source_document_id, Some(outcome.document.id));
        assert_eq!(
            service.read_content(&transformed).await.expect("bytes"),
            b"HELLO WORLD"
        );
    }

    #[tokio::test]
    async fn failing_transformer_marks_the_job_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());
        let plan = service
            .plan_transformation("blank.txt", Some("markdown"), Some("upper"))
            .expect("plan");

        let outcome = service
            .upload(NewUpload {
                fname: "blank.txt".into(),
                bytes: b"   ".to_vec(),
                plan,
                callback_url: None,
            })
            .await
            .expect("upload");

        let view = wait_for_terminal(&service, outcome.job.expect("job").id).await;
        assert_eq!(view.status, TransformationStatus::Failed);
        assert_eq!(
            view.error_message.as_deref(),
            Some("Document contains no extractable text")
        );
        assert!(view.transformed_document.is_none());
    }

    async fn upload_text(service: &DocumentService, fname: &str) -> Document {
        service
            .upload(NewUpload {
                fname: fname.into(),
                bytes: b"hello".to_vec(),
                plan: None,
                callback_url: None,
            })
            .await
            .expect("upload")
            .document
    }

    #[tokio::test]
    async fn soft_removed_documents_are_hidden_but_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());
        let kept = upload_text(&service, "kept.txt").await;
        let removed = upload_text(&service, "gone.txt").await;

        let record = service.remove(removed.id).await.expect("remove");
        assert!(record.is_deleted);
        assert!(record.deleted_at.is_none());

        assert!(matches!(
            service.get_document(removed.id).await,
            Err(DocumentError::NotFound(id)) if id == removed.id
        ));
        assert!(!service.contains(removed.id).await);
        let listed: Vec<Uuid> = service
            .list_documents(0, 10)
            .await
            .into_iter()
            .map(|document| document.id)
            .collect();
        assert_eq!(listed, vec![kept.id]);
        assert!(dir.path().join(&removed.object_key).exists());

        assert!(matches!(
            service.remove(removed.id).await,
            Err(DocumentError::NotFound(_))
        ));
        assert!(matches!(
            service.remove(Uuid::new_v4()).await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn permanent_removal_deletes_stored_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());
        let document = upload_text(&service, "purge.txt").await;
        assert!(dir.path().join(&document.object_key).exists());

        let record = service
            .permanent_remove(document.id)
            .await
            .expect("permanent remove");
        assert!(record.is_deleted);
        assert!(record.deleted_at.is_some());
        assert!(!dir.path().join(&document.object_key).exists());
        assert!(!service.contains(document.id).await);

        assert!(matches!(
            service.permanent_remove(document.id).await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn soft_removed_documents_can_still_be_purged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());
        let document = upload_text(&service, "twice.txt").await;

        service.remove(document.id).await.expect("remove");
        let record = service
            .permanent_remove(document.id)
            .await
            .expect("permanent remove");
        assert!(record.deleted_at.is_some());
        assert!(!dir.path().join(&document.object_key).exists());
    }

    #[tokio::test]
    async fn upload_callback_urls_follow_the_sender_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());

        assert!(service.callback_url(None).await.expect("none").is_none());
        assert!(service.callback_url(Some("  ")).await.expect("blank").is_none());
        for raw in [
            "http://example.com/hook",
            "https://127.0.0.1/hook",
            "https://169.254.169.254/latest/meta-data",
        ] {
            assert!(
                matches!(
                    service.callback_url(Some(raw)).await,
                    Err(DocumentError::InvalidCallbackUrl(_))
                ),
                "{raw}"
            );
        }
    }

    #[tokio::test]
    async fn multi_job_lookup_reports_missing_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let service = service(dir.path());
        let missing = Uuid::new_v4();

        let view = service.get_jobs(&[missing]).await;
        assert!(view.jobs.is_empty());
        assert_eq!(view.jobs_not_found, vec![missing]);
    }
}
