// src/models/mod.rs

//! Domain models for the stock watcher.
//!
//! Configuration, the fetched snapshot, and the fingerprint derived from it.

mod config;
mod fingerprint;
mod snapshot;

// Re-export all public types
pub use config::{
    Config, FeedConfig, HttpConfig, MessageConfig, PublisherConfig, ScheduleConfig, ScheduleMode,
    SourceConfig, StorageConfig,
};
pub use fingerprint::Fingerprint;
pub use snapshot::{Category, Item, Snapshot, VOLATILE_KEYS, canonical_category_name, is_volatile};
