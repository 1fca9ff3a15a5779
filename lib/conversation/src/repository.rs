//! Document repositories.
//!
//! A repository loads and saves the whole [`Document`] snapshot.

use crate::document::Document;
use crate::error::StoreError;
use async_trait::async_trait;
use kanna_core::Result;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Trait for snapshot storage.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Reads the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` when nothing has been stored yet, and
    /// `ReadFailed`/`Malformed` when the stored snapshot is unusable.
    async fn load(&self) -> Result<Document, StoreError>;

    /// Replaces the stored snapshot.
    ///
    /// Implementations must never leave a partially written snapshot behind.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SerializeFailed` or `StoreError::WriteFailed`.
    async fn save(&self, document: &Document) -> Result<(), StoreError>;
}

/// Stores the document as pretty-printed JSON in a single file.
///
/// Saves go to `<path>.tmp` first, are flushed to disk, and are then renamed
/// over `<path>`.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    /// Creates a repository backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the primary file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path snapshots are staged at before replacing the primary.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("memory.json"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_failed(&self, err: &std::io::Error) -> StoreError {
        StoreError::WriteFailed {
            path: self.path.display().to_string(),
            reason: err.to_string(),
        }
    }

    async fn write_temp(&self, temp: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = temp.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for JsonFileRepository {
    async fn load(&self) -> Result<Document, StoreError> {
        let path = self.path.display().to_string();
        let bytes = fs::read(&self.path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound { path: path.clone() }
            } else {
                StoreError::ReadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let document = serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        debug!(path = %path, bytes = bytes.len(), "loaded document");
        Ok(document)
    }

    async fn save(&self, document: &Document) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(document).map_err(|e| StoreError::SerializeFailed {
                reason: e.to_string(),
            })?;

        let temp = self.temp_path();
        if let Err(e) = self.write_temp(&temp, &bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(self.write_failed(&e).into());
        }

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(self.write_failed(&e).into());
        }

        debug!(path = %self.path.display(), bytes = bytes.len(), "saved document");
        Ok(())
    }
}
