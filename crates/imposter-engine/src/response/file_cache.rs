//! Read-through cache of response files, keyed by absolute path.

use crate::error::EngineError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

#[derive(Debug, Default)]
pub struct ResponseFileCache {
    entries: RwLock<HashMap<PathBuf, Bytes>>,
}

impl ResponseFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// File contents, reading from disk on first use.
    pub async fn get(&self, path: &Path) -> Result<Bytes, EngineError> {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let cached = self.entries.read().get(&key).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let contents = match tokio::fs::read(&key).await {
            Ok(contents) => Bytes::from(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::ResponseFileNotFound(key));
            }
            Err(e) => {
                error!("Failed to read response file {}: {}", key.display(), e);
                return Err(EngineError::Delivery(format!(
                    "failed to read {}: {}",
                    key.display(),
                    e
                )));
            }
        };

        debug!("Caching response file {} ({} bytes)", key.display(), contents.len());
        self.entries
            .write()
            .entry(key)
            .or_insert_with(|| contents.clone());
        Ok(contents)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
