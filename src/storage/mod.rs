//! Storage abstractions for fingerprint persistence.
//!
//! One fingerprint per feed, the hash of the last snapshot that was
//! published successfully.
//!
//! ## Directory Structure
//!
//! ```text
//! state/
//! ├── stock.hash       # 64 hex chars + newline
//! └── eggs.hash
//! ```

pub mod local;
pub mod memory;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::models::Fingerprint;

// Re-export for convenience
pub use local::FileFingerprintStore;
pub use memory::MemoryFingerprintStore;

/// Trait for fingerprint storage backends.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Last accepted fingerprint for `feed`, or `None` when there is no prior state.
    async fn load(&self, feed: &str) -> Result<Option<Fingerprint>, PersistenceError>;

    /// Replace the stored fingerprint for `feed`.
    async fn save(&self, feed: &str, fingerprint: &Fingerprint) -> Result<(), PersistenceError>;
}
