use crate::{
    evaluations::{
        grouping::group_traces,
        langfuse::{TraceStore, TraceStoreError},
        scores::{build_payload, merge_summaries},
        types::{
            EvaluationError, EvaluationOutcome, EvaluationRun, EvaluationStatus, ExportFormat,
            NewEvaluationRun, ScorePayload, ScoreQuery, StatusUpdate,
        },
    },
    metrics::ServiceMetrics,
    store::{MemoryStore, now},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Owns evaluation runs and their cached trace scores.
#[derive(Clone)]
pub struct EvaluationService {
    runs: Arc<MemoryStore<i64, EvaluationRun>>,
    next_id: Arc<AtomicI64>,
    traces: Arc<dyn TraceStore>,
    metrics: Arc<ServiceMetrics>,
}

impl EvaluationService {
    /// Assemble the service from its collaborators.
    pub fn new(traces: Arc<dyn TraceStore>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            runs: Arc::new(MemoryStore::new()),
            next_id: Arc::new(AtomicI64::new(1)),
            traces,
            metrics,
        }
    }

    /// Record a new run.
    pub async fn create(&self, request: NewEvaluationRun) -> Result<EvaluationRun, EvaluationError> {
        let run_name = request.run_name.trim().to_string();
        let dataset_name = request.dataset_name.trim().to_string();
        if run_name.is_empty() {
            return Err(EvaluationError::InvalidRequest(
                "run_name must not be empty".into(),
            ));
        }
        if dataset_name.is_empty() {
            return Err(EvaluationError::InvalidRequest(
                "dataset_name must not be empty".into(),
            ));
        }
        let status = match request.status.as_deref() {
            Some(status) => status.parse()?,
            None => EvaluationStatus::Pending,
        };

        let timestamp = now();
        let run = EvaluationRun {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            run_name,
            dataset_name,
            dataset_id: request.dataset_id,
            config: if request.config.is_null() {
                serde_json::json!({})
            } else {
                request.config
            },
            status,
            total_items: request.total_items,
            processed_items: request.processed_items,
            error_message: request.error_message,
            score: request.score.map(|score| ScorePayload {
                grouped_traces: None,
                ..score
            }),
            inserted_at: timestamp,
            updated_at: timestamp,
        };
        self.runs.insert(run.id, run.clone()).await;
        tracing::info!(
            evaluation_id = run.id,
            run_name = %run.run_name,
            dataset = %run.dataset_name,
            status = %run.status,
            "Evaluation run recorded"
        );
        Ok(run)
    }

    /// Record every run of a seed file, returning how many were loaded.
    pub async fn seed(&self, runs: Vec<NewEvaluationRun>) -> Result<usize, EvaluationError> {
        let count = runs.len();
        for run in runs {
            self.create(run).await?;
        }
        Ok(count)
    }

    /// Runs ordered newest first.
    pub async fn list(&self, limit: usize, offset: usize) -> Vec<EvaluationRun> {
        let mut runs = self.runs.values().await;
        runs.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at).then(b.id.cmp(&a.id)));
        runs.into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut run| {
                run.score = None;
                run
            })
            .collect()
    }

    /// Apply a status report from the external runner.
    ///
    /// Entering `completed` drops cached traces so the next trace request refetches them.
    pub async fn update_status(
        &self,
        id: i64,
        update: StatusUpdate,
    ) -> Result<EvaluationRun, EvaluationError> {
        let status: EvaluationStatus = update.status.parse()?;
        let mut run = self
            .runs
            .update(&id, |run| {
                if status == EvaluationStatus::Completed
                    && run.status != EvaluationStatus::Completed
                    && let Some(score) = run.score.as_mut()
                {
                    score.traces = None;
                }
                run.status = status;
                if let Some(processed) = update.processed_items {
                    run.processed_items = processed;
                }
                if let Some(total) = update.total_items {
                    run.total_items = total;
                }
                if update.error_message.is_some() {
                    run.error_message = update.error_message;
                }
                run.updated_at = now();
            })
            .await
            .ok_or(EvaluationError::NotFound(id))?;
        tracing::info!(evaluation_id = id, status = %run.status, processed = run.processed_items, "Evaluation status updated");
        run.score = None;
        Ok(run)
    }

    /// Fetch a run, optionally with trace scores, honouring the score cache.
    pub async fn get_with_scores(
        &self,
        id: i64,
        query: ScoreQuery,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        if query.resync_score && !query.get_trace_info {
            return Err(EvaluationError::InvalidQuery(
                "resync_score=true requires get_trace_info=true".into(),
            ));
        }
        if query.export_format == ExportFormat::Grouped && !query.get_trace_info {
            return Err(EvaluationError::InvalidQuery(
                "export_format=grouped requires get_trace_info=true".into(),
            ));
        }

        let mut run = self
            .runs
            .get(&id)
            .await
            .ok_or(EvaluationError::NotFound(id))?;

        if !query.get_trace_info {
            run.score = None;
            return Ok(EvaluationOutcome { run, error: None });
        }

        if run.status != EvaluationStatus::Completed {
            let error = format!(
                "Trace info is only available for completed evaluations. Current status: {}",
                run.status
            );
            return Ok(EvaluationOutcome {
                run,
                error: Some(error),
            });
        }

        if query.resync_score || !run.has_cached_traces() {
            match self.sync_scores(&run).await {
                Ok(updated) => run = updated,
                Err(error) => return Ok(EvaluationOutcome { run, error: Some(error) }),
            }
        }

        if query.export_format == ExportFormat::Grouped
            && let Some(score) = run.score.as_mut()
            && let Some(traces) = score.traces.as_deref()
        {
            match group_traces(traces) {
                Ok(groups) => score.grouped_traces = Some(groups),
                Err(error) => {
                    return Ok(EvaluationOutcome {
                        run,
                        error: Some(error.to_string()),
                    });
                }
            }
        }

        Ok(EvaluationOutcome { run, error: None })
    }

    async fn sync_scores(&self, run: &EvaluationRun) -> Result<EvaluationRun, String> {
        let traces = self
            .traces
            .fetch_run_traces(&run.dataset_name, &run.run_name)
            .await
            .map_err(|error| {
                tracing::warn!(evaluation_id = run.id, error = %error, "Trace fetch failed");
                match error {
                    TraceStoreError::RunNotFound { .. } => error.to_string(),
                    other => format!("Failed to fetch trace info from Langfuse: {other}"),
                }
            })?;

        let fresh = build_payload(traces);
        let existing = run
            .score
            .as_ref()
            .map(|score| score.summary_scores.clone())
            .unwrap_or_default();
        let payload = ScorePayload {
            summary_scores: merge_summaries(existing, fresh.summary_scores),
            traces: fresh.traces,
            grouped_traces: None,
        };
        let trace_count = payload.traces.as_ref().map_or(0, Vec::len);

        let updated = self
            .runs
            .update(&run.id, |stored| {
                stored.score = Some(payload);
                stored.updated_at = now();
            })
            .await
            .ok_or_else(|| format!("Evaluation run {} disappeared during sync", run.id))?;
        self.metrics.record_trace_sync();
        tracing::info!(evaluation_id = run.id, traces = trace_count, "Trace scores cached");
        Ok(updated)
    }
}
