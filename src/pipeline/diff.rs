//! Change detection against the persisted fingerprint.
//!
//! The detector only reads the store. Advancing the fingerprint is the
//! caller's job, after the snapshot has been published.

use std::sync::Arc;

use crate::error::PersistenceError;
use crate::models::{Fingerprint, Snapshot};
use crate::pipeline::normalize::fingerprint;
use crate::storage::FingerprintStore;

/// Outcome of comparing a snapshot with the stored fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDetection {
    /// True on first run or when the content differs
    pub changed: bool,
    /// Fingerprint of the snapshot just compared
    pub fingerprint: Fingerprint,
    /// Fingerprint found in the store, if any
    pub previous: Option<Fingerprint>,
}

impl ChangeDetection {
    pub fn is_first_run(&self) -> bool {
        self.previous.is_none()
    }
}

/// Compares snapshots against the fingerprint store.
#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn FingerprintStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn FingerprintStore>) -> Self {
        Self { store }
    }

    /// Hash `snapshot` and compare it with the fingerprint stored for `feed`.
    pub async fn has_changed(
        &self,
        feed: &str,
        snapshot: &Snapshot,
    ) -> Result<ChangeDetection, PersistenceError> {
        let current = fingerprint(snapshot);
        let previous = self.store.load(feed).await?;
        Ok(compare(previous, current))
    }
}

/// Convenience function to compare two fingerprints.
pub fn compare(previous: Option<Fingerprint>, current: Fingerprint) -> ChangeDetection {
    let changed = previous.as_ref() != Some(&current);
    ChangeDetection {
        changed,
        fingerprint: current,
        previous,
    }
}
