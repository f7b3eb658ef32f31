//! Storage abstraction used by the envelope resolver and handlers.
//!
//! `FileStorage` maps `file://` URIs into a root directory; cloud backends
//! implement the same trait in host crates.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unsupported storage uri: {0}")]
    UnsupportedUri(String),
    #[error("storage io error for {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// True when this backend handles the given URI scheme.
    fn supports(&self, uri: &str) -> bool;
    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError>;
    async fn put(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

/// Local filesystem storage: `file://relative/key` under a root directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let key = uri
            .strip_prefix("file://")
            .ok_or_else(|| StorageError::UnsupportedUri(uri.to_string()))?;
        // Keys must stay inside the root.
        let key = key.trim_start_matches('/');
        if key.is_empty() || Path::new(key).components().any(|c| c.as_os_str() == "..") {
            return Err(StorageError::UnsupportedUri(uri.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn supports(&self, uri: &str) -> bool {
        uri.starts_with("file://")
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(uri)?;
        tokio::fs::read(&path).await.map_err(|e| StorageError::Io {
            uri: uri.to_string(),
            source: e,
        })
    }

    async fn put(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(uri)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io {
                    uri: uri.to_string(),
                    source: e,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Io {
                uri: uri.to_string(),
                source: e,
            })
    }
}
