use super::{Transformer, ZeroxTransformer};
use crate::documents::{DocumentError, DocumentFormat, TransformationPlan};
use std::collections::HashMap;
use std::sync::Arc;

/// Transformer used when an upload names none.
pub const DEFAULT_TRANSFORMER: &str = "zerox";

/// Registered transformers plus the `(source, target) -> transformers` compatibility table.
pub struct TransformerRegistry {
    transformers: HashMap<&'static str, Arc<dyn Transformer>>,
    routes: Vec<(DocumentFormat, DocumentFormat, Vec<&'static str>)>,
}

impl TransformerRegistry {
    /// Registry with no transformers and no routes.
    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
            routes: Vec::new(),
        }
    }

    /// Register `transformer` for the `source -> target` conversion.
    pub fn register(
        mut self,
        source: DocumentFormat,
        target: DocumentFormat,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        let name = transformer.name();
        self.transformers.insert(name, transformer);
        match self
            .routes
            .iter_mut()
            .find(|(from, to, _)| *from == source && *to == target)
        {
            Some((_, _, names)) if !names.contains(&name) => names.push(name),
            Some(_) => {}
            None => self.routes.push((source, target, vec![name])),
        }
        self
    }

    /// Transformers able to convert `source` into `target`.
    pub fn available_for(&self, source: DocumentFormat, target: DocumentFormat) -> &[&'static str] {
        self.routes
            .iter()
            .find(|(from, to, _)| *from == source && *to == target)
            .map(|(_, _, names)| names.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a transformer by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(name).cloned()
    }

    /// Validate an upload's transformation request against the compatibility table.
    ///
    /// Returns `Ok(None)` when no target format was requested.
    pub fn plan(
        &self,
        fname: &str,
        target_format: Option<&str>,
        transformer: Option<&str>,
    ) -> Result<Option<TransformationPlan>, DocumentError> {
        let target_format = target_format.map(str::trim).filter(|value| !value.is_empty());
        let transformer = transformer.map(str::trim).filter(|value| !value.is_empty());

        let Some(target_format) = target_format else {
            return match transformer {
                Some(_) => Err(DocumentError::TransformerWithoutTarget),
                None => Ok(None),
            };
        };

        let source = DocumentFormat::from_filename(fname)?;
        let target: DocumentFormat = target_format.parse()?;
        let available = self.available_for(source, target);
        if available.is_empty() {
            return Err(DocumentError::UnsupportedTransformation {
                from: source,
                to: target,
            });
        }

        let requested = transformer.unwrap_or(DEFAULT_TRANSFORMER);
        let name = available
            .iter()
            .find(|name| **name == requested)
            .copied()
            .ok_or_else(|| DocumentError::UnknownTransformer {
                name: requested.to_string(),
                available: available.join(", "),
            })?;

        Ok(Some(TransformationPlan {
            source_format: source,
            target_format: target,
            transformer: name.to_string(),
        }))
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::empty().register(
            DocumentFormat::Pdf,
            DocumentFormat::Markdown,
            Arc::new(ZeroxTransformer::new()),
        )
    }
}
