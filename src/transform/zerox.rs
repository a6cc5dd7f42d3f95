//! `zerox`: PDF to markdown conversion from the PDF text layer.
//!
//! Extraction runs on the blocking pool; `pdf-extract` is CPU bound and may panic on malformed
//! input, which surfaces here as a join error and fails the job instead of the runtime.

use super::{TransformError, Transformer};
use crate::documents::DocumentFormat;
use async_trait::async_trait;

const PAGE_BREAK: char = '\u{c}';

/// Text-layer PDF transformer producing markdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroxTransformer;

impl ZeroxTransformer {
    /// Construct the transformer.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for ZeroxTransformer {
    fn name(&self) -> &'static str {
        "zerox"
    }

    async fn transform(
        &self,
        input: Vec<u8>,
        target: DocumentFormat,
    ) -> Result<String, TransformError> {
        if target != DocumentFormat::Markdown {
            return Err(TransformError::UnsupportedTarget {
                transformer: self.name().to_string(),
                target,
            });
        }

        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&input))
            .await
            .map_err(|err| TransformError::Extraction {
                source: anyhow::anyhow!("pdf extraction aborted: {err}"),
            })?
            .map_err(|err| TransformError::Extraction {
                source: anyhow::Error::msg(err.to_string()),
            })?;

        let markdown = render_markdown(&text);
        if markdown.is_empty() {
            return Err(TransformError::NoText);
        }
        tracing::debug!(chars = markdown.len(), "Rendered markdown from PDF text layer");
        Ok(markdown)
    }
}

/// Render extracted PDF text as markdown with one `## Page N` section per page.
///
/// Pages are separated by form feeds. Consecutive non-blank lines are joined into a paragraph
/// and inner whitespace is collapsed. Pages without text are skipped but keep their number.
pub fn render_markdown(text: &str) -> String {
    let mut sections = Vec::new();
    for (index, page) in text.split(PAGE_BREAK).enumerate() {
        let paragraphs = paragraphs(page);
        if paragraphs.is_empty() {
            continue;
        }
        sections.push(format!("## Page {}\n\n{}", index + 1, paragraphs.join("\n\n")));
    }
    sections.join("\n\n")
}

fn paragraphs(page: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in page.lines() {
        let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(normalized);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}
