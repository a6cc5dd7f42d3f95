use crate::{
    callback::CallbackSender,
    collections::{
        helpers::extract_error_message,
        provider::{CollectionProvider, ProviderDocument, ProviderResources},
        types::{
            Collection, CollectionActionType, CollectionDetails, CollectionError, CollectionJob,
            CollectionJobStatus, CollectionJobView, CreationRequest, JobCollection,
        },
    },
    documents::DocumentService,
    metrics::ServiceMetrics,
    response::ApiResponse,
    store::{MemoryStore, now},
};
use reqwest::Url;
use std::sync::Arc;
use uuid::Uuid;

/// Owns collections and their create/delete jobs.
///
/// Cloning is cheap; background jobs hold their own clone.
#[derive(Clone)]
pub struct CollectionService {
    collections: Arc<MemoryStore<Uuid, Collection>>,
    jobs: Arc<MemoryStore<Uuid, CollectionJob>>,
    documents: DocumentService,
    provider: Arc<dyn CollectionProvider>,
    callbacks: CallbackSender,
    metrics: Arc<ServiceMetrics>,
}

impl CollectionService {
    /// Assemble the service from its collaborators.
    pub fn new(
        documents: DocumentService,
        provider: Arc<dyn CollectionProvider>,
        callbacks: CallbackSender,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            collections: Arc::new(MemoryStore::new()),
            jobs: Arc::new(MemoryStore::new()),
            documents,
            provider,
            callbacks,
            metrics,
        }
    }

    /// Validate a creation request, record a PENDING job and start it in the background.
    pub async fn create(
        &self,
        request: CreationRequest,
    ) -> Result<CollectionJobView, CollectionError> {
        let request = request.normalize()?;
        let callback_url = self.callback_url(request.callback_url.as_deref()).await?;

        for id in &request.documents {
            if !self.documents.contains(*id).await {
                return Err(CollectionError::DocumentNotFound(*id));
            }
        }

        let job = self.insert_job(CollectionActionType::Create, None).await;
        tracing::info!(
            job_id = %job.id,
            documents = request.documents.len(),
            batch_size = request.batch_size,
            with_assistant = request.with_assistant(),
            "Collection creation scheduled"
        );

        let service = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            service.execute_create(job_id, request, callback_url).await;
        });

        Ok(CollectionJobView::new(&job, None))
    }

    /// Record a DELETE job for an active collection and start it in the background.
    pub async fn delete(
        &self,
        collection_id: Uuid,
        callback_url: Option<&str>,
    ) -> Result<CollectionJobView, CollectionError> {
        let callback_url = self.callback_url(callback_url).await?;
        let collection = self.claim_for_deletion(collection_id).await?;

        let job = self
            .insert_job(CollectionActionType::Delete, Some(collection.id))
            .await;
        tracing::info!(job_id = %job.id, collection_id = %collection.id, "Collection deletion scheduled");

        let service = self.clone();
        let job_id = job.id;
        tokio::spawn(async move {
            service
                .execute_delete(job_id, collection, callback_url)
                .await;
        });

        Ok(CollectionJobView::new(
            &job,
            Some(JobCollection::Id { id: collection_id }),
        ))
    }

    /// Public view of a job, embedding the collection once it is known.
    pub async fn job_info(&self, job_id: Uuid) -> Result<CollectionJobView, CollectionError> {
        let job = self
            .jobs
            .get(&job_id)
            .await
            .ok_or(CollectionError::JobNotFound(job_id))?;
        Ok(self.job_view(&job).await)
    }

    /// Active collections, newest first.
    pub async fn list(&self) -> Vec<Collection> {
        let mut collections: Vec<Collection> = self
            .collections
            .values()
            .await
            .into_iter()
            .filter(|collection| collection.deleted_at.is_none())
            .collect();
        collections.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at).then(a.id.cmp(&b.id)));
        collections
    }

    /// An active collection with the documents it indexes.
    pub async fn info(&self, collection_id: Uuid) -> Result<CollectionDetails, CollectionError> {
        let collection = self.get_active(collection_id).await?;
        let mut documents = Vec::with_capacity(collection.document_ids.len());
        for id in &collection.document_ids {
            if let Ok(document) = self.documents.get_document(*id).await {
                documents.push(document);
            }
        }
        Ok(CollectionDetails {
            collection,
            documents,
        })
    }

    /// Mark an active collection as being deleted, rejecting a second concurrent claim.
    async fn claim_for_deletion(
        &self,
        collection_id: Uuid,
    ) -> Result<Collection, CollectionError> {
        let claimed = self
            .collections
            .update_if(
                &collection_id,
                |collection| collection.deleted_at.is_none() && !collection.deleting,
                |collection| collection.deleting = true,
            )
            .await;
        match claimed {
            Some(collection) => Ok(collection),
            None => {
                self.get_active(collection_id).await?;
                Err(CollectionError::DeletionInProgress(collection_id))
            }
        }
    }

    async fn callback_url(&self, raw: Option<&str>) -> Result<Option<Url>, CollectionError> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(None);
        };
        self.callbacks
            .validate(raw)
            .await
            .map(Some)
            .map_err(|err| CollectionError::InvalidCallbackUrl(err.to_string()))
    }

    async fn get_active(&self, collection_id: Uuid) -> Result<Collection, CollectionError> {
        self.collections
            .get(&collection_id)
            .await
            .filter(|collection| collection.deleted_at.is_none())
            .ok_or(CollectionError::NotFound(collection_id))
    }

    async fn insert_job(
        &self,
        action_type: CollectionActionType,
        collection_id: Option<Uuid>,
    ) -> CollectionJob {
        let timestamp = now();
        let job = CollectionJob {
            id: Uuid::new_v4(),
            action_type,
            status: CollectionJobStatus::Pending,
            collection_id,
            error_message: None,
            inserted_at: timestamp,
            updated_at: timestamp,
        };
        self.jobs.insert(job.id, job.clone()).await;
        job
    }

    async fn job_view(&self, job: &CollectionJob) -> CollectionJobView {
        let collection = match (job.action_type, job.status, job.collection_id) {
            (CollectionActionType::Create, CollectionJobStatus::Successful, Some(id)) => self
                .collections
                .get(&id)
                .await
                .map(JobCollection::Full),
            (CollectionActionType::Delete, _, Some(id)) => Some(JobCollection::Id { id }),
            _ => None,
        };
        CollectionJobView::new(job, collection)
    }

    async fn set_job_state(
        &self,
        job_id: Uuid,
        status: CollectionJobStatus,
        collection_id: Option<Uuid>,
        error_message: Option<String>,
    ) -> Option<CollectionJob> {
        self.jobs
            .update(&job_id, |job| {
                job.status = status;
                if collection_id.is_some() {
                    job.collection_id = collection_id;
                }
                if error_message.is_some() {
                    job.error_message = error_message;
                }
                job.updated_at = now();
            })
            .await
    }

    /// Run a creation job to completion and deliver its callback.
    pub async fn execute_create(
        &self,
        job_id: Uuid,
        request: CreationRequest,
        callback_url: Option<Url>,
    ) {
        let started = std::time::Instant::now();
        if self
            .set_job_state(job_id, CollectionJobStatus::Processing, None, None)
            .await
            .is_none()
        {
            tracing::warn!(job_id = %job_id, "Collection job vanished before execution");
            return;
        }

        match self.build_collection(&request).await {
            Ok(collection) => {
                let collection_id = collection.id;
                self.collections.insert(collection_id, collection.clone()).await;
                let job = self
                    .set_job_state(
                        job_id,
                        CollectionJobStatus::Successful,
                        Some(collection_id),
                        None,
                    )
                    .await;
                self.metrics.record_collection(true);
                tracing::info!(
                    job_id = %job_id,
                    collection_id = %collection_id,
                    llm_service_name = %collection.llm_service_name,
                    documents = collection.document_ids.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Collection created"
                );

                if let (Some(url), Some(job)) = (callback_url, job) {
                    let view = CollectionJobView::new(&job, Some(JobCollection::Full(collection)));
                    self.callbacks
                        .notify(&url, &ApiResponse::success(view))
                        .await;
                }
            }
            Err(raw_error) => {
                let message = extract_error_message(&raw_error);
                tracing::error!(job_id = %job_id, error = %raw_error, "Collection creation failed");
                let job = self
                    .set_job_state(
                        job_id,
                        CollectionJobStatus::Failed,
                        None,
                        Some(message.clone()),
                    )
                    .await;
                self.metrics.record_collection(false);

                if let (Some(url), Some(job)) = (callback_url, job) {
                    let mut view = CollectionJobView::new(&job, None);
                    view.error_message = None;
                    self.callbacks
                        .notify(&url, &ApiResponse::failure_with_data(message, view))
                        .await;
                }
            }
        }
    }

    async fn build_collection(&self, request: &CreationRequest) -> Result<Collection, String> {
        let mut provider_documents = Vec::with_capacity(request.documents.len());
        for id in &request.documents {
            let document = self
                .documents
                .get_document(*id)
                .await
                .map_err(|err| err.to_string())?;
            let content = self
                .documents
                .read_content(&document)
                .await
                .map_err(|err| err.to_string())?;
            provider_documents.push(ProviderDocument {
                id: document.id,
                fname: document.fname,
                content,
            });
        }

        let ProviderResources {
            vector_store_id,
            assistant_id,
            llm_service_id,
            llm_service_name,
            ..
        } = self
            .provider
            .create(request, provider_documents)
            .await
            .map_err(|err| err.to_string())?;

        let timestamp = now();
        Ok(Collection {
            id: Uuid::new_v4(),
            provider: self.provider.name().to_string(),
            llm_service_id,
            llm_service_name,
            vector_store_id,
            assistant_id,
            name: request.name.clone(),
            description: request.description.clone(),
            document_ids: request.documents.clone(),
            inserted_at: timestamp,
            updated_at: timestamp,
            deleted_at: None,
            deleting: false,
        })
    }

    /// Run a deletion job to completion and deliver its callback.
    pub async fn execute_delete(
        &self,
        job_id: Uuid,
        collection: Collection,
        callback_url: Option<Url>,
    ) {
        if self
            .set_job_state(job_id, CollectionJobStatus::Processing, None, None)
            .await
            .is_none()
        {
            tracing::warn!(job_id = %job_id, "Collection job vanished before execution");
            return;
        }

        let outcome = self
            .provider
            .delete(&collection.vector_store_id, collection.assistant_id.as_deref())
            .await;
        let target = Some(JobCollection::Id { id: collection.id });

        match outcome {
            Ok(()) => {
                self.collections
                    .update(&collection.id, |record| {
                        let timestamp = now();
                        record.deleted_at = Some(timestamp);
                        record.updated_at = timestamp;
                    })
                    .await;
                let job = self
                    .set_job_state(job_id, CollectionJobStatus::Successful, None, None)
                    .await;
                tracing::info!(job_id = %job_id, collection_id = %collection.id, "Collection deleted");

                if let (Some(url), Some(job)) = (callback_url, job) {
                    let view = CollectionJobView::new(&job, target);
                    self.callbacks
                        .notify(&url, &ApiResponse::success(view))
                        .await;
                }
            }
            Err(error) => {
                let message = extract_error_message(&error.to_string());
                tracing::error!(
                    job_id = %job_id,
                    collection_id = %collection.id,
                    error = %error,
                    "Collection deletion failed"
                );
                self.collections
                    .update(&collection.id, |record| record.deleting = false)
                    .await;
                let job = self
                    .set_job_state(
                        job_id,
                        CollectionJobStatus::Failed,
                        None,
                        Some(message.clone()),
                    )
                    .await;

                if let (Some(url), Some(job)) = (callback_url, job) {
                    let mut view = CollectionJobView::new(&job, target);
                    view.error_message = None;
                    self.callbacks
                        .notify(&url, &ApiResponse::failure_with_data(message, view))
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackPolicy;
    use crate::collections::provider::ProviderError;
    use crate::documents::{LocalStorage, NewUpload};
    use crate::transform::TransformerRegistry;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct StubProvider {
        fail_with: Option<String>,
        created: Mutex<Vec<Vec<String>>>,
        deleted: Mutex<Vec<(String, Option<String>)>>,
        delete_gate: Option<Arc<tokio::sync::Notify>>,
        delete_fails: bool,
    }

    #[async_trait]
    impl CollectionProvider for StubProvider {
        fn name(&self) -> &'static str {
            "openai"
        }

        async fn create(
            &self,
            request: &CreationRequest,
            documents: Vec<ProviderDocument>,
        ) -> Result<ProviderResources, ProviderError> {
            if let Some(body) = &self.fail_with {
                return Err(ProviderError::UnexpectedStatus {
                    status: StatusCode::BAD_REQUEST,
                    body: body.clone(),
                });
            }
            self.created
                .lock()
                .expect("lock")
                .push(documents.into_iter().map(|doc| doc.fname).collect());
            let assistant_id = request.with_assistant().then(|| "asst_1".to_string());
            Ok(ProviderResources {
                vector_store_id: "vs_1".into(),
                llm_service_id: assistant_id.clone().unwrap_or_else(|| "vs_1".into()),
                llm_service_name: request
                    .model
                    .clone()
                    .unwrap_or_else(|| "openai vector store".into()),
                assistant_id,
                file_ids: vec!["file-1".into()],
            })
        }

        async fn delete(
            &self,
            vector_store_id: &str,
            assistant_id: Option<&str>,
        ) -> Result<(), ProviderError> {
            if let Some(gate) = &self.delete_gate {
                gate.notified().await;
            }
            self.deleted.lock().expect("lock").push((
                vector_store_id.to_string(),
                assistant_id.map(str::to_string),
            ));
            if self.delete_fails {
                return Err(ProviderError::UnexpectedStatus {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: "vector store busy".into(),
                });
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        documents: DocumentService,
        provider: Arc<StubProvider>,
        service: CollectionService,
    }

    fn fixture(provider: StubProvider) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let callbacks = CallbackSender::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            CallbackPolicy::PublicHttpsOnly,
        )
        .expect("sender");
        let metrics = Arc::new(ServiceMetrics::new());
        let documents = DocumentService::new(
            Arc::new(LocalStorage::new(dir.path())),
            Arc::new(TransformerRegistry::default()),
            callbacks.clone(),
            metrics.clone(),
            1024 * 1024,
        );
        let provider = Arc::new(provider);
        let service = CollectionService::new(
            documents.clone(),
            provider.clone(),
            callbacks,
            metrics,
        );
        Fixture {
            _dir: dir,
            documents,
            provider,
            service,
        }
    }

    async fn upload(documents: &DocumentService, name: &str) -> Uuid {
        documents
            .upload(NewUpload {
                fname: name.into(),
                bytes: b"content".to_vec(),
                plan: None,
                callback_url: None,
            })
            .await
            .expect("upload")
            .document
            .id
    }

    fn creation(body: serde_json::Value) -> CreationRequest {
        serde_json::from_value(body).expect("request")
    }

    async fn wait_for_terminal(service: &CollectionService, job_id: Uuid) -> CollectionJobView {
        for _ in 0..100 {
            let view = service.job_info(job_id).await.expect("job");
            if matches!(
                view.status,
                CollectionJobStatus::Successful | CollectionJobStatus::Failed
            ) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn unknown_documents_are_rejected_before_a_job_exists() {
        let fixture = fixture(StubProvider::default());
        let missing = Uuid::new_v4();
        let error = fixture
            .service
            .create(creation(json!({ "documents": [missing] })))
            .await
            .expect_err("missing document");
        assert!(matches!(error, CollectionError::DocumentNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn creation_job_embeds_the_collection_when_successful() {
        let fixture = fixture(StubProvider::default());
        let first = upload(&fixture.documents, "a.pdf").await;
        let second = upload(&fixture.documents, "b.pdf").await;

        let pending = fixture
            .service
            .create(creation(json!({
                "documents": [first, second, first],
                "model": "gpt-4o",
                "instructions": "Use the files",
                "name": "handbook"
            })))
            .await
            .expect("create");
        assert_eq!(pending.status, CollectionJobStatus::Pending);
        assert!(pending.collection.is_none());

        let done = wait_for_terminal(&fixture.service, pending.job_id).await;
        assert_eq!(done.status, CollectionJobStatus::Successful);
        let Some(JobCollection::Full(collection)) = done.collection else {
            panic!("collection missing from successful job");
        };
        assert_eq!(collection.llm_service_name, "gpt-4o");
        assert_eq!(collection.assistant_id.as_deref(), Some("asst_1"));
        assert_eq!(collection.document_ids, vec![first, second]);
        assert_eq!(
            fixture.provider.created.lock().expect("lock").clone(),
            vec![vec!["a.pdf".to_string(), "b.pdf".to_string()]]
        );

        let details = fixture.service.info(collection.id).await.expect("info");
        assert_eq!(details.documents.len(), 2);
        assert_eq!(fixture.service.list().await.len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_marks_job_failed_with_concise_message() {
        let fixture = fixture(StubProvider {
            fail_with: Some(r#"{"error": {"message": "File is not parseable"}}"#.into()),
            ..StubProvider::default()
        });
        let id = upload(&fixture.documents, "broken.pdf").await;

        let pending = fixture
            .service
            .create(creation(json!({ "documents": [id] })))
            .await
            .expect("create");
        let done = wait_for_terminal(&fixture.service, pending.job_id).await;

        assert_eq!(done.status, CollectionJobStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("File is not parseable"));
        assert!(done.collection.is_none());
        assert!(fixture.service.list().await.is_empty());
    }

    #[tokio::test]
    async fn deletion_removes_remote_resources_and_soft_deletes() {
        let fixture = fixture(StubProvider::default());
        let id = upload(&fixture.documents, "a.pdf").await;
        let created = fixture
            .service
            .create(creation(json!({ "documents": [id] })))
            .await
            .expect("create");
        let created = wait_for_terminal(&fixture.service, created.job_id).await;
        let Some(JobCollection::Full(collection)) = created.collection else {
            panic!("collection missing");
        };

        let deletion = fixture
            .service
            .delete(collection.id, None)
            .await
            .expect("delete");
        assert_eq!(deletion.action_type, CollectionActionType::Delete);
        let done = wait_for_terminal(&fixture.service, deletion.job_id).await;
        assert_eq!(done.status, CollectionJobStatus::Successful);

        assert_eq!(
            fixture.provider.deleted.lock().expect("lock").clone(),
            vec![("vs_1".to_string(), None)]
        );
        assert!(matches!(
            fixture.service.info(collection.id).await,
            Err(CollectionError::NotFound(_))
        ));
        assert!(matches!(
            fixture.service.delete(collection.id, None).await,
            Err(CollectionError::NotFound(_))
        ));
    }

    async fn created_collection(fixture: &Fixture) -> Collection {
        let id = upload(&fixture.documents, "a.pdf").await;
        let created = fixture
            .service
            .create(creation(json!({ "documents": [id] })))
            .await
            .expect("create");
        let created = wait_for_terminal(&fixture.service, created.job_id).await;
        let Some(JobCollection::Full(collection)) = created.collection else {
            panic!("collection missing");
        };
        collection
    }

    #[tokio::test]
    async fn second_delete_while_one_is_running_is_rejected() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let fixture = fixture(StubProvider {
            delete_gate: Some(gate.clone()),
            ..StubProvider::default()
        });
        let collection = created_collection(&fixture).await;

        let first = fixture
            .service
            .delete(collection.id, None)
            .await
            .expect("first delete");
        let error = fixture
            .service
            .delete(collection.id, None)
            .await
            .expect_err("second delete");
        assert!(matches!(error, CollectionError::DeletionInProgress(id) if id == collection.id));

        gate.notify_one();
        let done = wait_for_terminal(&fixture.service, first.job_id).await;
        assert_eq!(done.status, CollectionJobStatus::Successful);
        assert_eq!(fixture.provider.deleted.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn failed_delete_releases_the_collection() {
        let fixture = fixture(StubProvider {
            delete_fails: true,
            ..StubProvider::default()
        });
        let collection = created_collection(&fixture).await;

        let first = fixture
            .service
            .delete(collection.id, None)
            .await
            .expect("delete");
        let done = wait_for_terminal(&fixture.service, first.job_id).await;
        assert_eq!(done.status, CollectionJobStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("vector store busy"));

        assert!(fixture.service.info(collection.id).await.is_ok());
        let retry = fixture
            .service
            .delete(collection.id, None)
            .await
            .expect("retry accepted");
        wait_for_terminal(&fixture.service, retry.job_id).await;
        assert_eq!(fixture.provider.deleted.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn invalid_callback_url_is_rejected() {
        let fixture = fixture(StubProvider::default());
        for callback in [
            "ftp://x",
            "http://example.org/hook",
            "https://169.254.169.254/latest/meta-data",
            "https://[::1]/hook",
        ] {
            let error = fixture
                .service
                .create(creation(json!({ "documents": [], "callback_url": callback })))
                .await
                .expect_err(callback);
            assert!(
                matches!(error, CollectionError::InvalidCallbackUrl(_)),
                "{callback}"
            );
        }
    }

    #[tokio::test]
    async fn delete_with_internal_callback_keeps_the_collection_claimable() {
        let fixture = fixture(StubProvider::default());
        let collection = created_collection(&fixture).await;

        let error = fixture
            .service
            .delete(collection.id, Some("https://10.0.0.5/hook"))
            .await
            .expect_err("private callback");
        assert!(matches!(error, CollectionError::InvalidCallbackUrl(_)));

        let deletion = fixture
            .service
            .delete(collection.id, None)
            .await
            .expect("delete");
        let done = wait_for_terminal(&fixture.service, deletion.job_id).await;
        assert_eq!(done.status, CollectionJobStatus::Successful);
    }
}
