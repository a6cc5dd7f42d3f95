//! Evaluation runs and their Langfuse trace scores.

mod grouping;
pub mod langfuse;
pub mod scores;
mod seed;
mod service;
pub mod types;

pub use grouping::{MissingQuestionId, group_traces};
pub use langfuse::{LangfuseClient, TraceStore, TraceStoreError};
pub use seed::load_seed_file;
pub use service::EvaluationService;
pub use types::{
    EvaluationError, EvaluationOutcome, EvaluationRun, EvaluationStatus, ExportFormat,
    GroupedTrace, NewEvaluationRun, QuestionId, ScoreDataType, ScorePayload, ScoreQuery,
    StatusUpdate, SummaryScore, Trace, TraceScore,
};
