//! In-memory fingerprint store for dry runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::PersistenceError;
use crate::models::Fingerprint;
use crate::storage::FingerprintStore;

#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    entries: RwLock<HashMap<String, Fingerprint>>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn load(&self, feed: &str) -> Result<Option<Fingerprint>, PersistenceError> {
        Ok(self.entries.read().await.get(feed).cloned())
    }

    async fn save(&self, feed: &str, fingerprint: &Fingerprint) -> Result<(), PersistenceError> {
        self.entries
            .write()
            .await
            .insert(feed.to_string(), fingerprint.clone());
        Ok(())
    }
}
