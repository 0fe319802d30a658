//! Local filesystem fingerprint store.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── {feed}.hash       # Last published fingerprint
//! └── {feed}.tmp        # Only present while a write is in flight
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::PersistenceError;
use crate::models::Fingerprint;
use crate::storage::FingerprintStore;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct FileFingerprintStore {
    root_dir: PathBuf,
}

impl FileFingerprintStore {
    /// Create a store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Get the fingerprint file for a feed.
    pub fn path(&self, feed: &str) -> PathBuf {
        self.root_dir.join(format!("{feed}.hash"))
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        Self::ensure_dir(path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await
    }

    /// Read the file, returning None if it doesn't exist.
    async fn read_string(path: &Path) -> std::io::Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FingerprintStore for FileFingerprintStore {
    async fn load(&self, feed: &str) -> Result<Option<Fingerprint>, PersistenceError> {
        let path = self.path(feed);
        let content = Self::read_string(&path)
            .await
            .map_err(|source| PersistenceError::Read {
                feed: feed.to_string(),
                source,
            })?;

        let Some(content) = content else {
            log::debug!("No fingerprint stored for '{feed}' at {path:?}");
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        match Fingerprint::parse(&content) {
            Some(fp) => Ok(Some(fp)),
            None => {
                log::warn!("Ignoring unreadable fingerprint in {path:?}");
                Ok(None)
            }
        }
    }

    async fn save(&self, feed: &str, fingerprint: &Fingerprint) -> Result<(), PersistenceError> {
        let path = self.path(feed);
        let content = format!("{fingerprint}\n");
        Self::write_bytes(&path, content.as_bytes())
            .await
            .map_err(|source| PersistenceError::Write {
                feed: feed.to_string(),
                source,
            })?;
        log::debug!("Stored fingerprint {} for '{feed}'", fingerprint.short());
        Ok(())
    }
}
