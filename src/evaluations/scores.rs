//! Score filtering, rounding and per-name aggregation.

use crate::evaluations::types::{ScoreDataType, ScorePayload, SummaryScore, Trace, TraceScore};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the cached payload from freshly fetched traces.
///
/// Score names missing from any trace are dropped, and names with an unrated (null) value on
/// any trace get no summary. Numeric values are rounded and summarised by mean and population
/// standard deviation; other types are summarised by label counts.
pub fn build_payload(traces: Vec<Trace>) -> ScorePayload {
    let names = common_score_names(&traces);
    let mut traces = traces;
    for trace in &mut traces {
        trace.scores = filter_scores(std::mem::take(&mut trace.scores), &names);
    }

    let summary_scores = names
        .iter()
        .filter_map(|name| summarize(name, &traces))
        .collect();

    for trace in &mut traces {
        for score in &mut trace.scores {
            if score.data_type == ScoreDataType::Numeric
                && let Some(value) = score.value.as_f64()
            {
                score.value = Value::from(round2(value));
            }
        }
    }

    ScorePayload {
        summary_scores,
        traces: Some(traces),
        grouped_traces: None,
    }
}

/// Merge summaries by name: existing order is kept, fresh entries replace or append.
pub fn merge_summaries(
    existing: Vec<SummaryScore>,
    fresh: Vec<SummaryScore>,
) -> Vec<SummaryScore> {
    let mut merged = existing;
    for summary in fresh {
        match merged.iter_mut().find(|entry| entry.name() == summary.name()) {
            Some(entry) => *entry = summary,
            None => merged.push(summary),
        }
    }
    merged
}

/// Score names present on every trace, in first-trace order.
fn common_score_names(traces: &[Trace]) -> Vec<String> {
    let Some((first, rest)) = traces.split_first() else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for score in &first.scores {
        if !names.contains(&score.name) {
            names.push(score.name.clone());
        }
    }
    for trace in rest {
        let present: HashSet<&str> = trace.scores.iter().map(|s| s.name.as_str()).collect();
        names.retain(|name| present.contains(name.as_str()));
    }
    names
}

fn filter_scores(scores: Vec<TraceScore>, names: &[String]) -> Vec<TraceScore> {
    let mut seen = HashSet::new();
    scores
        .into_iter()
        .filter(|score| names.contains(&score.name) && seen.insert(score.name.clone()))
        .collect()
}

fn summarize(name: &str, traces: &[Trace]) -> Option<SummaryScore> {
    let scores: Vec<&TraceScore> = traces
        .iter()
        .filter_map(|trace| trace.scores.iter().find(|score| score.name == name))
        .collect();
    let data_type = scores.first()?.data_type;
    let total_pairs = scores.len();
    // Only fully rated names are summarised.
    if scores.iter().any(|score| score.value.is_null()) {
        return None;
    }

    match data_type {
        ScoreDataType::Numeric => {
            let values: Vec<f64> = scores
                .iter()
                .filter_map(|score| score.value.as_f64())
                .collect();
            if values.is_empty() {
                return None;
            }
            let count = values.len() as f64;
            let avg = values.iter().sum::<f64>() / count;
            let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count;
            Some(SummaryScore::Numeric {
                name: name.to_string(),
                avg: round2(avg),
                std: round2(variance.sqrt()),
                total_pairs,
            })
        }
        ScoreDataType::Categorical => Some(SummaryScore::Categorical {
            name: name.to_string(),
            distribution: distribution(&scores),
            total_pairs,
        }),
        ScoreDataType::Boolean => Some(SummaryScore::Boolean {
            name: name.to_string(),
            distribution: distribution(&scores),
            total_pairs,
        }),
    }
}

fn distribution(scores: &[&TraceScore]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for score in scores {
        let label = match &score.value {
            Value::String(label) => label.clone(),
            other => other.to_string(),
        };
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}
