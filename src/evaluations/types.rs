//! Evaluation runs, trace scores and their error type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors raised by evaluation endpoints.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Query flags are inconsistent.
    #[error("{0}")]
    InvalidQuery(String),
    /// `export_format` is not `row` or `grouped`.
    #[error("Invalid export_format '{0}'. Expected one of: row, grouped")]
    UnknownExportFormat(String),
    /// Request body failed validation.
    #[error("{0}")]
    InvalidRequest(String),
    /// Status string is not a known lifecycle state.
    #[error("Invalid evaluation status '{0}'. Expected one of: pending, processing, completed, failed")]
    UnknownStatus(String),
    /// Evaluation run does not exist.
    #[error("Evaluation run {0} not found")]
    NotFound(i64),
}

/// Lifecycle of an evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    /// Created, runner not started.
    Pending,
    /// Runner in progress.
    Processing,
    /// Runner finished; traces are available.
    Completed,
    /// Runner failed.
    Failed,
}

impl EvaluationStatus {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(EvaluationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Shape of the trace list in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// One entry per trace.
    #[default]
    Row,
    /// Traces additionally collated by `question_id`.
    Grouped,
}

impl FromStr for ExportFormat {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "row" => Ok(Self::Row),
            "grouped" => Ok(Self::Grouped),
            other => Err(EvaluationError::UnknownExportFormat(other.to_string())),
        }
    }
}

/// Langfuse score data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreDataType {
    /// Real-valued score.
    #[default]
    Numeric,
    /// Labelled score.
    Categorical,
    /// True/false score, summarised by label.
    Boolean,
}

/// Question identifier attached to a trace; integer or string upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    /// Integer identifier.
    Int(i64),
    /// String identifier; empty when the trace carried none.
    Text(String),
}

impl QuestionId {
    /// Whether the trace carried no identifier.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

impl Default for QuestionId {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// One score attached to a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceScore {
    /// Evaluator name.
    pub name: String,
    /// Number for numeric scores, label otherwise.
    pub value: Value,
    /// Score data type.
    pub data_type: ScoreDataType,
    /// Evaluator comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Question/answer context and scores of one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Trace identifier in the trace store.
    pub trace_id: String,
    /// Question identifier, empty when absent.
    #[serde(default)]
    pub question_id: QuestionId,
    /// Question sent to the model.
    #[serde(default)]
    pub question: String,
    /// Model answer.
    #[serde(default)]
    pub llm_answer: String,
    /// Expected answer.
    #[serde(default)]
    pub ground_truth_answer: String,
    /// Scores attached to the trace.
    #[serde(default)]
    pub scores: Vec<TraceScore>,
}

/// Traces sharing a `question_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedTrace {
    /// Shared question identifier.
    pub question_id: QuestionId,
    /// Question of the first trace in the group.
    pub question: String,
    /// Expected answer of the first trace in the group.
    pub ground_truth_answer: String,
    /// Answers in trace order.
    pub llm_answers: Vec<String>,
    /// Trace ids in trace order.
    pub trace_ids: Vec<String>,
    /// Per-trace score lists in trace order.
    pub scores: Vec<Vec<TraceScore>>,
}

/// Aggregate of one score name across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryScore {
    /// Mean and population standard deviation.
    Numeric {
        /// Score name.
        name: String,
        /// Mean, two decimals.
        avg: f64,
        /// Population standard deviation, two decimals.
        std: f64,
        /// Number of traces carrying the score.
        total_pairs: usize,
    },
    /// Label counts.
    Categorical {
        /// Score name.
        name: String,
        /// Count per label.
        distribution: BTreeMap<String, u64>,
        /// Number of traces carrying the score.
        total_pairs: usize,
    },
    /// Label counts of a boolean score.
    Boolean {
        /// Score name.
        name: String,
        /// Count per label.
        distribution: BTreeMap<String, u64>,
        /// Number of traces carrying the score.
        total_pairs: usize,
    },
}

impl SummaryScore {
    /// Score name.
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name, .. }
            | Self::Categorical { name, .. }
            | Self::Boolean { name, .. } => name,
        }
    }
}

/// Cached trace scores of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorePayload {
    /// One aggregate per score name.
    #[serde(default)]
    pub summary_scores: Vec<SummaryScore>,
    /// Per-trace detail; absent until traces have been fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traces: Option<Vec<Trace>>,
    /// Traces collated by question; only populated in grouped responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_traces: Option<Vec<GroupedTrace>>,
}

/// An evaluation run executed by an external runner against a Langfuse dataset.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRun {
    /// Run identifier.
    pub id: i64,
    /// Run name in the trace store.
    pub run_name: String,
    /// Dataset name in the trace store.
    pub dataset_name: String,
    /// Dataset identifier, if known.
    pub dataset_id: Option<i64>,
    /// Runner configuration.
    pub config: Value,
    /// Lifecycle state.
    pub status: EvaluationStatus,
    /// Items in the dataset.
    pub total_items: u64,
    /// Items processed so far.
    pub processed_items: u64,
    /// Runner failure description.
    pub error_message: Option<String>,
    /// Cached scores; omitted unless trace info was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<ScorePayload>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl EvaluationRun {
    /// Whether per-trace detail is cached.
    pub fn has_cached_traces(&self) -> bool {
        self.score
            .as_ref()
            .is_some_and(|score| score.traces.is_some())
    }
}

/// Body of `POST /evaluations` and entries of the seed file.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvaluationRun {
    /// Run name in the trace store.
    pub run_name: String,
    /// Dataset name in the trace store.
    pub dataset_name: String,
    /// Dataset identifier.
    #[serde(default)]
    pub dataset_id: Option<i64>,
    /// Runner configuration.
    #[serde(default)]
    pub config: Value,
    /// Items in the dataset.
    #[serde(default)]
    pub total_items: u64,
    /// Initial status; defaults to pending.
    #[serde(default)]
    pub status: Option<String>,
    /// Items processed so far.
    #[serde(default)]
    pub processed_items: u64,
    /// Runner failure description.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Pre-computed scores.
    #[serde(default)]
    pub score: Option<ScorePayload>,
}

/// Body of `PATCH /evaluations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    /// New lifecycle state.
    pub status: String,
    /// Items processed so far.
    #[serde(default)]
    pub processed_items: Option<u64>,
    /// Items in the dataset.
    #[serde(default)]
    pub total_items: Option<u64>,
    /// Runner failure description.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Flags of `GET /evaluations/{id}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreQuery {
    /// Include trace scores.
    pub get_trace_info: bool,
    /// Refetch traces even when cached.
    pub resync_score: bool,
    /// Trace list shape.
    pub export_format: ExportFormat,
}

/// A run plus the failure message to report alongside it, if any.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// The run as it should be returned.
    pub run: EvaluationRun,
    /// Failure to report with `success: false`.
    pub error: Option<String>,
}
