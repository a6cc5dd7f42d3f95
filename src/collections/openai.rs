//! OpenAI REST client for files, vector stores and Assistants.

use crate::collections::{
    helpers::batches,
    provider::{CollectionProvider, ProviderDocument, ProviderError, ProviderResources},
    types::{CreationRequest, VECTOR_STORE_SERVICE_NAME},
};
use crate::config::Config;
use async_trait::async_trait;
use reqwest::{Client, Method, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

#[derive(Debug, Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileCounts {
    #[serde(default)]
    failed: u64,
}

#[derive(Debug, Deserialize)]
struct FileBatch {
    id: String,
    status: String,
    #[serde(default)]
    file_counts: FileCounts,
}

#[derive(Debug, Default)]
struct CreatedResources {
    file_ids: Vec<String>,
    vector_store_id: Option<String>,
    assistant_id: Option<String>,
}

/// Collection provider backed by the OpenAI REST API.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl OpenAiProvider {
    /// Build a client for `base_url`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        poll_interval: Duration,
        poll_attempts: u32,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().user_agent("docrag/0.1").build()?;
        let base_url = normalize_base_url(base_url).map_err(ProviderError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|key| !key.is_empty()),
            "Initialized OpenAI HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            poll_interval,
            poll_attempts: poll_attempts.max(1),
        })
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        Self::new(
            &config.openai_base_url,
            config.openai_api_key.clone(),
            config.vector_store_poll_interval(),
            config.vector_store_poll_attempts,
        )
    }

    /// Upload one document with purpose `assistants`, returning the file id.
    pub async fn upload_file(&self, document: &ProviderDocument) -> Result<String, ProviderError> {
        let part = multipart::Part::bytes(document.content.clone()).file_name(document.fname.clone());
        let form = multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let response = self
            .request(Method::POST, "files")?
            .multipart(form)
            .send()
            .await?;
        let file: ObjectId = read_json(response).await?;
        tracing::debug!(document_id = %document.id, file_id = %file.id, "File uploaded");
        Ok(file.id)
    }

    /// Create an empty vector store.
    pub async fn create_vector_store(&self, name: Option<&str>) -> Result<String, ProviderError> {
        let mut body = json!({});
        if let Some(name) = name {
            body["name"] = Value::from(name);
        }
        let response = self
            .request(Method::POST, "vector_stores")?
            .header(BETA_HEADER.0, BETA_HEADER.1)
            .json(&body)
            .send()
            .await?;
        let store: ObjectId = read_json(response).await?;
        tracing::debug!(vector_store_id = %store.id, "Vector store created");
        Ok(store.id)
    }

    /// Attach `file_ids` to a vector store and wait for ingestion to finish.
    pub async fn attach_files(
        &self,
        vector_store_id: &str,
        file_ids: &[String],
    ) -> Result<(), ProviderError> {
        let response = self
            .request(
                Method::POST,
                &format!("vector_stores/{vector_store_id}/file_batches"),
            )?
            .header(BETA_HEADER.0, BETA_HEADER.1)
            .json(&json!({ "file_ids": file_ids }))
            .send()
            .await?;
        let mut batch: FileBatch = read_json(response).await?;

        for attempt in 1..=self.poll_attempts {
            match batch.status.as_str() {
                "completed" if batch.file_counts.failed == 0 => {
                    tracing::debug!(
                        vector_store_id,
                        batch_id = %batch.id,
                        files = file_ids.len(),
                        "File batch completed"
                    );
                    return Ok(());
                }
                "in_progress" => {
                    tracing::trace!(batch_id = %batch.id, attempt, "File batch still processing");
                    tokio::time::sleep(self.poll_interval).await;
                    let response = self
                        .request(
                            Method::GET,
                            &format!(
                                "vector_stores/{vector_store_id}/file_batches/{}",
                                batch.id
                            ),
                        )?
                        .header(BETA_HEADER.0, BETA_HEADER.1)
                        .send()
                        .await?;
                    batch = read_json(response).await?;
                }
                _ => {
                    return Err(ProviderError::BatchFailed {
                        batch_id: batch.id,
                        status: batch.status,
                        failed: batch.file_counts.failed,
                    });
                }
            }
        }

        match batch.status.as_str() {
            "completed" if batch.file_counts.failed == 0 => Ok(()),
            "in_progress" => Err(ProviderError::BatchTimeout {
                batch_id: batch.id,
                attempts: self.poll_attempts,
            }),
            _ => Err(ProviderError::BatchFailed {
                batch_id: batch.id,
                status: batch.status,
                failed: batch.file_counts.failed,
            }),
        }
    }

    /// Create an Assistant with `file_search` over the vector store.
    pub async fn create_assistant(
        &self,
        vector_store_id: &str,
        request: &CreationRequest,
    ) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": request.model,
            "instructions": request.instructions,
            "temperature": request.temperature,
            "tools": [{ "type": "file_search" }],
            "tool_resources": {
                "file_search": { "vector_store_ids": [vector_store_id] }
            },
        });
        if let Some(name) = &request.name {
            body["name"] = Value::from(name.as_str());
        }
        if let Some(description) = &request.description {
            body["description"] = Value::from(description.as_str());
        }

        let response = self
            .request(Method::POST, "assistants")?
            .header(BETA_HEADER.0, BETA_HEADER.1)
            .json(&body)
            .send()
            .await?;
        let assistant: ObjectId = read_json(response).await?;
        tracing::debug!(assistant_id = %assistant.id, vector_store_id, "Assistant created");
        Ok(assistant.id)
    }

    /// Delete an uploaded file.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError> {
        self.delete_resource(&format!("files/{file_id}")).await
    }

    /// Delete a vector store.
    pub async fn delete_vector_store(&self, vector_store_id: &str) -> Result<(), ProviderError> {
        self.delete_resource(&format!("vector_stores/{vector_store_id}"))
            .await
    }

    /// Delete an Assistant.
    pub async fn delete_assistant(&self, assistant_id: &str) -> Result<(), ProviderError> {
        self.delete_resource(&format!("assistants/{assistant_id}"))
            .await
    }

    async fn delete_resource(&self, path: &str) -> Result<(), ProviderError> {
        let response = self
            .request(Method::DELETE, path)?
            .header(BETA_HEADER.0, BETA_HEADER.1)
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn build(
        &self,
        request: &CreationRequest,
        documents: &[ProviderDocument],
        created: &mut CreatedResources,
    ) -> Result<ProviderResources, ProviderError> {
        for document in documents {
            let file_id = self.upload_file(document).await?;
            created.file_ids.push(file_id);
        }

        let vector_store_id = self.create_vector_store(request.name.as_deref()).await?;
        created.vector_store_id = Some(vector_store_id.clone());

        let file_ids = created.file_ids.clone();
        let batch_count = file_ids.len().div_ceil(request.batch_size.max(1));
        for batch in batches(&file_ids, request.batch_size) {
            self.attach_files(&vector_store_id, batch).await?;
        }
        tracing::info!(
            vector_store_id = %vector_store_id,
            batches = batch_count,
            files = file_ids.len(),
            "Vector store populated"
        );

        let (assistant_id, llm_service_id, llm_service_name) = match &request.model {
            Some(model) if request.with_assistant() => {
                let assistant_id = self.create_assistant(&vector_store_id, request).await?;
                created.assistant_id = Some(assistant_id.clone());
                (Some(assistant_id.clone()), assistant_id, model.clone())
            }
            _ => (
                None,
                vector_store_id.clone(),
                VECTOR_STORE_SERVICE_NAME.to_string(),
            ),
        };

        Ok(ProviderResources {
            vector_store_id,
            assistant_id,
            file_ids,
            llm_service_id,
            llm_service_name,
        })
    }

    async fn rollback(&self, created: &CreatedResources) {
        if let Some(assistant_id) = &created.assistant_id
            && let Err(error) = self.delete_assistant(assistant_id).await
        {
            tracing::warn!(assistant_id = %assistant_id, error = %error, "Rollback: failed to delete assistant");
        }
        if let Some(vector_store_id) = &created.vector_store_id
            && let Err(error) = self.delete_vector_store(vector_store_id).await
        {
            tracing::warn!(vector_store_id = %vector_store_id, error = %error, "Rollback: failed to delete vector store");
        }
        for file_id in &created.file_ids {
            if let Err(error) = self.delete_file(file_id).await {
                tracing::warn!(file_id = %file_id, error = %error, "Rollback: failed to delete file");
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ProviderError::MissingCredentials)?;
        let url = format_endpoint(&self.base_url, path);
        Ok(self.client.request(method, url).bearer_auth(api_key))
    }
}

#[async_trait]
impl CollectionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn create(
        &self,
        request: &CreationRequest,
        documents: Vec<ProviderDocument>,
    ) -> Result<ProviderResources, ProviderError> {
        let mut created = CreatedResources::default();
        match self.build(request, &documents, &mut created).await {
            Ok(resources) => Ok(resources),
            Err(error) => {
                tracing::error!(
                    error = %error,
                    files = created.file_ids.len(),
                    vector_store = created.vector_store_id.is_some(),
                    assistant = created.assistant_id.is_some(),
                    "Collection build failed; removing created resources"
                );
                self.rollback(&created).await;
                Err(error)
            }
        }
    }

    async fn delete(
        &self,
        vector_store_id: &str,
        assistant_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        if let Some(assistant_id) = assistant_id {
            self.delete_assistant(assistant_id).await?;
            tracing::info!(assistant_id, "Deleted assistant");
        }
        self.delete_vector_store(vector_store_id).await?;
        tracing::info!(vector_store_id, "Deleted vector store");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let body = response.text().await.unwrap_or_default();
        let error = ProviderError::UnexpectedStatus { status, body };
        tracing::error!(error = %error, "OpenAI request failed");
        Err(error)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<(), ProviderError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::UnexpectedStatus { status, body })
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{DELETE, GET, POST},
        MockServer,
    };
    use uuid::Uuid;

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            &server.base_url(),
            Some("sk-test".into()),
            Duration::from_millis(5),
            5,
        )
        .expect("provider")
    }

    fn request(body: Value) -> CreationRequest {
        serde_json::from_value::<CreationRequest>(body)
            .expect("deserialize")
            .normalize()
            .expect("valid")
    }

    fn document(name: &str) -> ProviderDocument {
        ProviderDocument {
            id: Uuid::new_v4(),
            fname: name.to_string(),
            content: b"%PDF-1.4 test".to_vec(),
        }
    }

    #[test]
    fn formats_endpoints_without_double_slashes() {
        assert_eq!(
            format_endpoint("https://api.openai.com/v1/", "/files"),
            "https://api.openai.com/v1/files"
        );
        assert_eq!(
            normalize_base_url("https://api.openai.com/v1/").expect("url"),
            "https://api.openai.com/v1"
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let provider = OpenAiProvider::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_millis(1),
            1,
        )
        .expect("provider");
        let error = provider
            .create_vector_store(None)
            .await
            .expect_err("no credentials");
        assert!(matches!(error, ProviderError::MissingCredentials));
    }

    #[tokio::test]
    async fn creates_vector_store_and_assistant() {
        let server = MockServer::start_async().await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/files")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({ "id": "file-1" }));
            })
            .await;
        let store = server
            .mock_async(|when, then| {
                when.method(POST).path("/vector_stores");
                then.status(200).json_body(json!({ "id": "vs_1" }));
            })
            .await;
        let batch = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/vector_stores/vs_1/file_batches")
                    .json_body(json!({ "file_ids": ["file-1"] }));
                then.status(200).json_body(json!({
                    "id": "vsfb_1",
                    "status": "in_progress",
                    "file_counts": { "failed": 0 }
                }));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(GET).path("/vector_stores/vs_1/file_batches/vsfb_1");
                then.status(200).json_body(json!({
                    "id": "vsfb_1",
                    "status": "completed",
                    "file_counts": { "failed": 0 }
                }));
            })
            .await;
        let assistant = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/assistants")
                    .header("openai-beta", "assistants=v2")
                    .json_body_partial(r#"{"model": "gpt-4o", "tools": [{"type": "file_search"}]}"#);
                then.status(200).json_body(json!({ "id": "asst_1" }));
            })
            .await;

        let resources = provider(&server)
            .create(
                &request(json!({
                    "documents": [],
                    "model": "gpt-4o",
                    "instructions": "Answer from the files"
                })),
                vec![document("a.pdf")],
            )
            .await
            .expect("create");

        upload.assert_async().await;
        store.assert_async().await;
        batch.assert_async().await;
        poll.assert_async().await;
        assistant.assert_async().await;
        assert_eq!(resources.vector_store_id, "vs_1");
        assert_eq!(resources.assistant_id.as_deref(), Some("asst_1"));
        assert_eq!(resources.llm_service_id, "asst_1");
        assert_eq!(resources.llm_service_name, "gpt-4o");
        assert_eq!(resources.file_ids, vec!["file-1".to_string()]);
    }

    #[tokio::test]
    async fn vector_store_only_uses_service_name() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/files");
                then.status(200).json_body(json!({ "id": "file-1" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vector_stores");
                then.status(200).json_body(json!({ "id": "vs_1" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vector_stores/vs_1/file_batches");
                then.status(200)
                    .json_body(json!({ "id": "vsfb_1", "status": "completed" }));
            })
            .await;

        let resources = provider(&server)
            .create(&request(json!({ "documents": [] })), vec![document("a.pdf")])
            .await
            .expect("create");

        assert!(resources.assistant_id.is_none());
        assert_eq!(resources.llm_service_id, "vs_1");
        assert_eq!(resources.llm_service_name, VECTOR_STORE_SERVICE_NAME);
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_created_resources() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/files");
                then.status(200).json_body(json!({ "id": "file-1" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vector_stores");
                then.status(200).json_body(json!({ "id": "vs_1" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vector_stores/vs_1/file_batches");
                then.status(200).json_body(json!({
                    "id": "vsfb_1",
                    "status": "completed",
                    "file_counts": { "failed": 1 }
                }));
            })
            .await;
        let delete_store = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/vector_stores/vs_1");
                then.status(200).json_body(json!({ "deleted": true }));
            })
            .await;
        let delete_file = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/files/file-1");
                then.status(200).json_body(json!({ "deleted": true }));
            })
            .await;

        let error = provider(&server)
            .create(&request(json!({ "documents": [] })), vec![document("broken.pdf")])
            .await
            .expect_err("failed batch");

        assert!(matches!(error, ProviderError::BatchFailed { failed: 1, .. }));
        delete_store.assert_async().await;
        delete_file.assert_async().await;
    }

    #[tokio::test]
    async fn upstream_errors_carry_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/vector_stores");
                then.status(400)
                    .body(r#"{"error": {"message": "bad request"}}"#);
            })
            .await;

        let error = provider(&server)
            .create_vector_store(Some("docs"))
            .await
            .expect_err("400");
        assert_eq!(
            error.to_string(),
            r#"Error code: 400 - {"error": {"message": "bad request"}}"#
        );
    }
}
