// src/services/source.rs

//! Snapshot sources and the composite feed source.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;

use crate::error::FetchError;
use crate::models::{FeedConfig, HttpConfig, Snapshot, SourceConfig};
use crate::services::{HttpSource, WebSocketSource};
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

/// Anything that can produce a [`Snapshot`].
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Short description for logs. Must not contain secrets.
    fn describe(&self) -> String;

    async fn fetch(&self) -> Result<Snapshot, FetchError>;
}

/// Build the adapter for one configured source.
pub fn build_source(
    config: &SourceConfig,
    http: &HttpConfig,
    client: &Client,
) -> Box<dyn SnapshotSource> {
    match config {
        SourceConfig::Http { url } => Box::new(HttpSource::new(url, client.clone(), http.timeout())),
        SourceConfig::Websocket { url, request } => Box::new(WebSocketSource::new(
            url,
            request,
            &http.user_agent,
            http.timeout(),
        )),
    }
}

/// One primary source plus auxiliary sources merged into it.
///
/// Every source is retried on its own. A failed auxiliary source only loses
/// its categories; a failed primary source fails the fetch.
pub struct FeedSource {
    primary: Box<dyn SnapshotSource>,
    auxiliary: Vec<Box<dyn SnapshotSource>>,
    retry: RetryPolicy,
}

impl FeedSource {
    pub fn new(
        primary: Box<dyn SnapshotSource>,
        auxiliary: Vec<Box<dyn SnapshotSource>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            auxiliary,
            retry,
        }
    }

    pub fn from_config(feed: &FeedConfig, http: &HttpConfig, client: &Client) -> Self {
        Self::new(
            build_source(&feed.source, http, client),
            feed.auxiliary
                .iter()
                .map(|source| build_source(source, http, client))
                .collect(),
            http.retry.clone(),
        )
    }

    async fn fetch_one(&self, source: &dyn SnapshotSource) -> Result<Snapshot, FetchError> {
        let label = source.describe();
        retry_with_backoff(&self.retry, &label, |_| source.fetch())
            .await
            .map_err(|failure| failure.error)
    }
}

#[async_trait]
impl SnapshotSource for FeedSource {
    fn describe(&self) -> String {
        let mut parts = vec![self.primary.describe()];
        parts.extend(self.auxiliary.iter().map(|s| s.describe()));
        parts.join(" + ")
    }

    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let (primary, auxiliary) = futures::join!(
            self.fetch_one(self.primary.as_ref()),
            join_all(self.auxiliary.iter().map(|s| self.fetch_one(s.as_ref())))
        );

        let mut snapshot = primary?;
        for (source, result) in self.auxiliary.iter().zip(auxiliary) {
            match result {
                Ok(extra) => snapshot.merge(extra),
                Err(e) => log::warn!("Auxiliary source {} failed: {e}", source.describe()),
            }
        }
        Ok(snapshot)
    }
}
