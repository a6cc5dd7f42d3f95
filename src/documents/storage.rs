//! Object storage for uploaded and transformed document bytes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors raised by object storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("I/O failure on '{key}': {source}")]
    Io {
        /// Object key being accessed.
        key: String,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// Key escaped the storage root or was otherwise unusable.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Interface implemented by document object stores.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Persist `bytes` under `key`, returning the public object URL.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Read the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove the object stored under `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed object store rooted at a directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a store rooted at `root`; the directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|component| {
            !matches!(component, std::path::Component::Normal(_))
        });
        if key.is_empty() || escapes {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStorage for LocalStorage {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(key)?;
        let io_error = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::write(&path, bytes).await.map_err(io_error)?;
        tracing::debug!(key, bytes = bytes.len(), "Object stored");

        let absolute = fs::canonicalize(&path).await.unwrap_or(path);
        Ok(format!("file://{}", absolute.display()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        fs::read(&path).await.map_err(|source| StorageError::Io {
            key: key.to_string(),
            source,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(key, "Object already absent");
                return Ok(());
            }
            Err(source) => {
                return Err(StorageError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        }
        // Per-document directory; left in place if anything else lives there.
        if let Some(parent) = path.parent().filter(|parent| *parent != self.root) {
            let _ = fs::remove_dir(parent).await;
        }
        tracing::debug!(key, "Object deleted");
        Ok(())
    }
}

/// Derive a storage key from a document id and the uploader's filename.
///
/// Only the final path component of the filename is kept.
pub fn object_key(document_id: &uuid::Uuid, fname: &str) -> String {
    let base = fname
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or("document");
    format!("{document_id}/{base}")
}
