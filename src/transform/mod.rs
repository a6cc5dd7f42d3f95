//! Document format transformers and the registry that selects them.

mod registry;
pub mod zerox;

pub use registry::{DEFAULT_TRANSFORMER, TransformerRegistry};
pub use zerox::ZeroxTransformer;

use crate::documents::DocumentFormat;
use async_trait::async_trait;
use thiserror::Error;

/// Errors produced while converting a document.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The transformer cannot produce the requested format.
    #[error("Transformer '{transformer}' cannot produce {target}")]
    UnsupportedTarget {
        /// Transformer that was asked.
        transformer: String,
        /// Requested output format.
        target: DocumentFormat,
    },
    /// Source bytes could not be parsed.
    #[error("Failed to extract document content: {source}")]
    Extraction {
        /// Underlying parser error.
        #[source]
        source: anyhow::Error,
    },
    /// Source parsed but contained no usable text.
    #[error("Document contains no extractable text")]
    NoText,
}

/// Interface implemented by document transformers.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Registry name of the transformer.
    fn name(&self) -> &'static str;

    /// Convert `input` into `target`, returning the rendered text.
    async fn transform(
        &self,
        input: Vec<u8>,
        target: DocumentFormat,
    ) -> Result<String, TransformError>;
}
