//! Service layer for the stock watcher.
//!
//! This module contains the adapters at the edges of a cycle:
//! - Snapshot sources (`HttpSource`, `WebSocketSource`, `FeedSource`)
//! - Post composition (`SummaryComposer`)
//! - Publishing (`GraphPublisher`)

mod composer;
mod http_source;
mod publisher;
mod source;
mod ws_source;

pub use composer::{Composer, SummaryComposer};
pub use http_source::HttpSource;
pub use publisher::{GraphPublisher, Post, PublishOutcome, Publisher};
pub use source::{FeedSource, SnapshotSource, build_source};
pub use ws_source::WebSocketSource;
