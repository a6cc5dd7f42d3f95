use crate::evaluations::types::NewEvaluationRun;
use anyhow::Context;
use std::path::Path;

/// Read a JSON array of evaluation runs to preload at startup.
pub fn load_seed_file(path: &Path) -> anyhow::Result<Vec<NewEvaluationRun>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read evaluation seed file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse evaluation seed file {}", path.display()))
}
