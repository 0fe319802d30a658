// src/lib.rs

//! Stock watcher library.
//!
//! Polls shop stock and weather feeds, fingerprints the normalized
//! content, and publishes a summary post whenever it changes.

pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
