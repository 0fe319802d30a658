// src/context.rs

//! Process-wide dependencies, built once at startup and shared via `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;

use crate::error::Result;
use crate::models::{Config, FeedConfig};
use crate::pipeline::diff::ChangeDetector;
use crate::pipeline::scheduler::SchedulePlan;
use crate::services::{
    Composer, FeedSource, GraphPublisher, Publisher, SnapshotSource, SummaryComposer,
};
use crate::storage::{FileFingerprintStore, FingerprintStore};
use crate::utils::http::create_async_client;

pub struct AppContext {
    pub config: Arc<Config>,
    pub client: Client,
    pub store: Arc<dyn FingerprintStore>,
    pub detector: ChangeDetector,
    pub publisher: Arc<dyn Publisher>,
    pub composer: Arc<dyn Composer>,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        client: Client,
        store: Arc<dyn FingerprintStore>,
        publisher: Arc<dyn Publisher>,
        composer: Arc<dyn Composer>,
    ) -> Self {
        Self {
            config,
            client,
            detector: ChangeDetector::new(store.clone()),
            store,
            publisher,
            composer,
        }
    }

    /// Wire the production adapters from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let client = create_async_client(&config.http)?;
        let store = Arc::new(FileFingerprintStore::new(&config.storage.state_dir));
        let publisher = Arc::new(GraphPublisher::new(config.publisher.clone(), client.clone()));
        let composer = Arc::new(SummaryComposer::new(config.message.clone()));
        log::debug!("Fingerprints stored under {:?}", config.storage.state_dir);

        Ok(Self::new(Arc::new(config), client, store, publisher, composer))
    }

    /// Resolve one feed's source and schedule.
    pub fn feed_runtime(&self, feed: &FeedConfig) -> Result<FeedRuntime> {
        let plan = SchedulePlan::from_config(self.config.schedule_for(feed))?;
        let source = FeedSource::from_config(feed, &self.config.http, &self.client);
        Ok(FeedRuntime {
            name: feed.name.clone(),
            title: feed.title().to_string(),
            media: feed.media_path.clone(),
            plan,
            source: Box::new(source),
        })
    }

    /// Resolve every configured feed.
    pub fn feed_runtimes(&self) -> Result<Vec<FeedRuntime>> {
        self.config
            .feeds
            .iter()
            .map(|feed| self.feed_runtime(feed))
            .collect()
    }
}

/// Everything a cycle needs to know about one feed.
pub struct FeedRuntime {
    pub name: String,
    pub title: String,
    pub media: Option<PathBuf>,
    pub plan: SchedulePlan,
    pub source: Box<dyn SnapshotSource>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScheduleMode;

    const CONFIG: &str = r#"
        [storage]
        state_dir = "/tmp/stockwatch-test-state"

        [[feeds]]
        name = "stock"
        source = { kind = "http", url = "https://stock.example.com/api" }
        auxiliary = [{ kind = "websocket", url = "wss://weather.example.com", request = "weather" }]

        [[feeds]]
        name = "eggs"
        title = "Egg Shop"
        media_path = "media/eggs.png"
        source = { kind = "http", url = "https://stock.example.com/eggs" }
        schedule = { mode = "adaptive", timezone = "Asia/Kolkata" }
    "#;

    #[test]
    fn test_feed_runtimes_resolve_per_feed_settings() {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let ctx = AppContext::from_config(config).unwrap();
        let feeds = ctx.feed_runtimes().unwrap();

        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].title, "stock");
        assert_eq!(feeds[0].plan.mode, ScheduleMode::Fixed);
        assert_eq!(
            feeds[0].source.describe(),
            "GET https://stock.example.com/api + WS wss://weather.example.com/ (weather)"
        );

        assert_eq!(feeds[1].title, "Egg Shop");
        assert_eq!(feeds[1].media, Some(PathBuf::from("media/eggs.png")));
        assert_eq!(feeds[1].plan.mode, ScheduleMode::Adaptive);
        assert_eq!(feeds[1].plan.tz, chrono_tz::Asia::Kolkata);
    }
}
