use crate::evaluations::types::{GroupedTrace, QuestionId, Trace};
use std::collections::HashMap;
use thiserror::Error;

/// Grouping failed because a trace has no question id.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Trace '{trace_id}' has no question_id; grouped export requires a question_id on every trace")]
pub struct MissingQuestionId {
    /// Trace without an identifier.
    pub trace_id: String,
}

/// Collate traces by `question_id`, keeping first-appearance order of groups and trace order
/// inside each group.
pub fn group_traces(traces: &[Trace]) -> Result<Vec<GroupedTrace>, MissingQuestionId> {
    let mut groups: Vec<GroupedTrace> = Vec::new();
    let mut index: HashMap<QuestionId, usize> = HashMap::new();

    for trace in traces {
        if trace.question_id.is_missing() {
            return Err(MissingQuestionId {
                trace_id: trace.trace_id.clone(),
            });
        }

        let slot = *index.entry(trace.question_id.clone()).or_insert_with(|| {
            groups.push(GroupedTrace {
                question_id: trace.question_id.clone(),
                question: trace.question.clone(),
                ground_truth_answer: trace.ground_truth_answer.clone(),
                llm_answers: Vec::new(),
                trace_ids: Vec::new(),
                scores: Vec::new(),
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.llm_answers.push(trace.llm_answer.clone());
        group.trace_ids.push(trace.trace_id.clone());
        group.scores.push(trace.scores.clone());
    }

    Ok(groups)
}
