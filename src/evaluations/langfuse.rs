//! Langfuse public API client for dataset runs and traces.

use crate::config::Config;
use crate::evaluations::types::{QuestionId, ScoreDataType, Trace, TraceScore};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while reading a run from the trace store.
#[derive(Debug, Error)]
pub enum TraceStoreError {
    /// Public/secret keys are not configured.
    #[error("Langfuse credentials are not configured")]
    MissingCredentials,
    /// Host URL failed to parse.
    #[error("Invalid Langfuse host: {0}")]
    InvalidUrl(String),
    /// The dataset run could not be read.
    #[error("Run '{run}' not found in dataset '{dataset}'")]
    RunNotFound {
        /// Run name.
        run: String,
        /// Dataset name.
        dataset: String,
    },
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Langfuse responded with an unexpected status.
    #[error("Unexpected Langfuse response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by Langfuse.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },
}

/// Source of scored traces for an evaluation run.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Fetch every trace of `run_name` in `dataset_name`, in run-item order, with raw scores.
    async fn fetch_run_traces(
        &self,
        dataset_name: &str,
        run_name: &str,
    ) -> Result<Vec<Trace>, TraceStoreError>;
}

#[derive(Debug, Deserialize)]
struct DatasetRun {
    #[serde(rename = "datasetRunItems", default)]
    items: Vec<DatasetRunItem>,
}

#[derive(Debug, Deserialize)]
struct DatasetRunItem {
    #[serde(rename = "traceId")]
    trace_id: String,
}

#[derive(Debug, Deserialize)]
struct TraceRecord {
    id: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    scores: Vec<ScoreRecord>,
}

#[derive(Debug, Deserialize)]
struct ScoreRecord {
    name: String,
    #[serde(default)]
    value: Option<f64>,
    #[serde(rename = "stringValue", default)]
    string_value: Option<String>,
    #[serde(rename = "dataType", default)]
    data_type: ScoreDataType,
    #[serde(default)]
    comment: Option<String>,
}

/// HTTP client for the Langfuse public API.
pub struct LangfuseClient {
    client: Client,
    host: Url,
    public_key: Option<String>,
    secret_key: Option<String>,
    concurrency: usize,
}

impl LangfuseClient {
    /// Build a client for `host`.
    pub fn new(
        host: &str,
        public_key: Option<String>,
        secret_key: Option<String>,
        concurrency: usize,
    ) -> Result<Self, TraceStoreError> {
        let client = Client::builder().user_agent("docrag/0.1").build()?;
        let host = Url::parse(host).map_err(|err| TraceStoreError::InvalidUrl(err.to_string()))?;
        if host.cannot_be_a_base() {
            return Err(TraceStoreError::InvalidUrl(host.to_string()));
        }
        tracing::debug!(
            host = %host,
            has_credentials = public_key.is_some() && secret_key.is_some(),
            "Initialized Langfuse HTTP client"
        );
        Ok(Self {
            client,
            host,
            public_key,
            secret_key,
            concurrency: concurrency.max(1),
        })
    }

    /// Build a client from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, TraceStoreError> {
        Self::new(
            &config.langfuse_host,
            config.langfuse_public_key.clone(),
            config.langfuse_secret_key.clone(),
            config.trace_fetch_concurrency,
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TraceStoreError> {
        let mut url = self.host.clone();
        url.path_segments_mut()
            .map_err(|_| TraceStoreError::InvalidUrl(self.host.to_string()))?
            .pop_if_empty()
            .extend(["api", "public"])
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, TraceStoreError> {
        let (Some(public_key), Some(secret_key)) = (&self.public_key, &self.secret_key) else {
            return Err(TraceStoreError::MissingCredentials);
        };
        Ok(self
            .client
            .get(url)
            .basic_auth(public_key, Some(secret_key))
            .send()
            .await?)
    }

    async fn fetch_run(&self, dataset_name: &str, run_name: &str) -> Result<DatasetRun, TraceStoreError> {
        let url = self.endpoint(&["datasets", dataset_name, "runs", run_name])?;
        let response = self.get(url).await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, dataset = dataset_name, run = run_name, "Dataset run lookup failed");
            return Err(TraceStoreError::RunNotFound {
                run: run_name.to_string(),
                dataset: dataset_name.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    async fn fetch_trace(&self, trace_id: &str) -> Result<Trace, TraceStoreError> {
        let url = self.endpoint(&["traces", trace_id])?;
        let response = self.get(url).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraceStoreError::UnexpectedStatus { status, body });
        }
        let record: TraceRecord = response.json().await?;
        Ok(trace_from_record(record))
    }
}

#[async_trait]
impl TraceStore for LangfuseClient {
    async fn fetch_run_traces(
        &self,
        dataset_name: &str,
        run_name: &str,
    ) -> Result<Vec<Trace>, TraceStoreError> {
        let run = self.fetch_run(dataset_name, run_name).await?;
        let trace_ids: Vec<String> = run.items.into_iter().map(|item| item.trace_id).collect();
        tracing::debug!(
            dataset = dataset_name,
            run = run_name,
            traces = trace_ids.len(),
            "Fetching run traces"
        );

        let results: Vec<(String, Result<Trace, TraceStoreError>)> = stream::iter(trace_ids)
            .map(|trace_id| async move {
                let result = self.fetch_trace(&trace_id).await;
                (trace_id, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut traces = Vec::with_capacity(results.len());
        for (trace_id, result) in results {
            match result {
                Ok(trace) => traces.push(trace),
                Err(error) => {
                    tracing::warn!(trace_id = %trace_id, error = %error, "Skipping trace that failed to load");
                }
            }
        }
        Ok(traces)
    }
}

fn trace_from_record(record: TraceRecord) -> Trace {
    Trace {
        trace_id: record.id,
        question_id: question_id(&record.metadata),
        question: text_field(&record.input, "question"),
        llm_answer: text_field(&record.output, "answer"),
        ground_truth_answer: record
            .metadata
            .get("ground_truth")
            .map(value_text)
            .unwrap_or_default(),
        scores: record.scores.into_iter().map(score_from_record).collect(),
    }
}

/// `value[key]` when `value` is an object, `value` itself when it is a string.
fn text_field(value: &Value, key: &str) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => map.get(key).map(value_text).unwrap_or_default(),
        _ => String::new(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn question_id(metadata: &Value) -> QuestionId {
    match metadata.get("question_id") {
        Some(Value::Number(number)) => number
            .as_i64()
            .map(QuestionId::Int)
            .unwrap_or_else(|| QuestionId::Text(number.to_string())),
        Some(Value::String(text)) => QuestionId::Text(text.clone()),
        _ => QuestionId::default(),
    }
}

fn score_from_record(record: ScoreRecord) -> TraceScore {
    let value = match record.data_type {
        ScoreDataType::Numeric => record.value.map(Value::from).unwrap_or(Value::Null),
        ScoreDataType::Categorical | ScoreDataType::Boolean => {
            match (record.string_value, record.value) {
                (Some(label), _) => Value::String(label),
                (None, Some(value)) if record.data_type == ScoreDataType::Boolean => {
                    Value::String(if value != 0.0 { "True" } else { "False" }.to_string())
                }
                (None, Some(value)) => Value::String(value.to_string()),
                (None, None) => Value::Null,
            }
        }
    };
    TraceScore {
        name: record.name,
        value,
        data_type: record.data_type,
        comment: record.comment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};
    use serde_json::json;

    fn client(server: &MockServer) -> LangfuseClient {
        LangfuseClient::new(
            &server.base_url(),
            Some("pk-lf".into()),
            Some("sk-lf".into()),
            2,
        )
        .expect("client")
    }

    #[test]
    fn maps_trace_fields() {
        let record: TraceRecord = serde_json::from_value(json!({
            "id": "t1",
            "input": {"question": "What is 2+2?"},
            "output": "4",
            "metadata": {"ground_truth": "4", "question_id": 3},
            "scores": [
                {"name": "accuracy", "value": 1.0, "dataType": "NUMERIC"},
                {"name": "grounded", "value": 0.0, "dataType": "BOOLEAN"},
                {"name": "tone", "stringValue": "polite", "dataType": "CATEGORICAL", "comment": "ok"}
            ]
        }))
        .expect("record");

        let trace = trace_from_record(record);
        assert_eq!(trace.question, "What is 2+2?");
        assert_eq!(trace.llm_answer, "4");
        assert_eq!(trace.ground_truth_answer, "4");
        assert_eq!(trace.question_id, QuestionId::Int(3));
        assert_eq!(trace.scores[0].value, json!(1.0));
        assert_eq!(trace.scores[1].value, json!("False"));
        assert_eq!(trace.scores[2].value, json!("polite"));
        assert_eq!(trace.scores[2].comment.as_deref(), Some("ok"));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let record: TraceRecord = serde_json::from_value(json!({ "id": "t1" })).expect("record");
        let trace = trace_from_record(record);
        assert!(trace.question.is_empty());
        assert!(trace.question_id.is_missing());
        assert!(trace.scores.is_empty());
    }

    #[tokio::test]
    async fn fetches_traces_in_run_order_and_skips_failures() {
        let server = MockServer::start_async().await;
        let run = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/public/datasets/qa-set/runs/run-1")
                    .header_exists("authorization");
                then.status(200).json_body(json!({
                    "name": "run-1",
                    "datasetRunItems": [
                        {"traceId": "t1"},
                        {"traceId": "missing"},
                        {"traceId": "t2"}
                    ]
                }));
            })
            .await;
        for id in ["t1", "t2"] {
            server
                .mock_async(|when, then| {
                    when.method(GET).path(format!("/api/public/traces/{id}"));
                    then.status(200).json_body(json!({
                        "id": id,
                        "input": {"question": format!("q-{id}")},
                        "output": {"answer": format!("a-{id}")},
                        "metadata": {"question_id": "q"},
                        "scores": [{"name": "accuracy", "value": 0.5, "dataType": "NUMERIC"}]
                    }));
                })
                .await;
        }
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/public/traces/missing");
                then.status(404).body("not found");
            })
            .await;

        let traces = client(&server)
            .fetch_run_traces("qa-set", "run-1")
            .await
            .expect("traces");

        run.assert_async().await;
        let ids: Vec<&str> = traces.iter().map(|t| t.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(traces[1].llm_answer, "a-t2");
    }

    #[tokio::test]
    async fn unknown_run_reports_dataset_and_run() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/public/datasets/qa/runs/nope");
                then.status(404).body("{}");
            })
            .await;

        let error = client(&server)
            .fetch_run_traces("qa", "nope")
            .await
            .expect_err("missing run");
        assert_eq!(error.to_string(), "Run 'nope' not found in dataset 'qa'");
    }

    #[tokio::test]
    async fn missing_credentials_fail_fast() {
        let client = LangfuseClient::new("http://127.0.0.1:9", None, None, 1).expect("client");
        let error = client
            .fetch_run_traces("qa", "run")
            .await
            .expect_err("no credentials");
        assert!(matches!(error, TraceStoreError::MissingCredentials));
    }
}
