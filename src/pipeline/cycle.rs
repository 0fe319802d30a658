//! One fetch → detect → compose → publish → persist pass for a feed.
//!
//! A cycle never fails as a whole. Every error is folded into a
//! [`CycleReport`] so the scheduler can always re-arm.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::context::{AppContext, FeedRuntime};
use crate::error::{FetchError, PersistenceError, PublishError};
use crate::models::Fingerprint;
use crate::pipeline::scheduler::CycleRunner;
use crate::services::{Post, PublishOutcome};

/// What a cycle did.
#[derive(Debug)]
pub enum CycleReport {
    /// Content matches the stored fingerprint
    Unchanged {
        fingerprint: Fingerprint,
        countdown: Option<Duration>,
    },
    /// Posted, and the fingerprint was advanced
    Published {
        post_id: String,
        fingerprint: Fingerprint,
        countdown: Option<Duration>,
    },
    /// Changed, but the publisher declined to post
    Skipped {
        reason: String,
        countdown: Option<Duration>,
    },
    /// Dry run: detection only
    Checked {
        changed: bool,
        fingerprint: Fingerprint,
        countdown: Option<Duration>,
    },
    FetchFailed {
        error: FetchError,
    },
    StoreUnavailable {
        error: PersistenceError,
    },
    PublishFailed {
        error: PublishError,
        countdown: Option<Duration>,
    },
    /// Posted, but the fingerprint could not be written
    PersistFailed {
        post_id: String,
        error: PersistenceError,
        countdown: Option<Duration>,
    },
}

impl CycleReport {
    /// Smallest countdown of the snapshot this cycle saw, if any.
    pub fn countdown(&self) -> Option<Duration> {
        match self {
            CycleReport::Unchanged { countdown, .. }
            | CycleReport::Published { countdown, .. }
            | CycleReport::Skipped { countdown, .. }
            | CycleReport::Checked { countdown, .. }
            | CycleReport::PublishFailed { countdown, .. }
            | CycleReport::PersistFailed { countdown, .. } => *countdown,
            CycleReport::FetchFailed { .. } | CycleReport::StoreUnavailable { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleReport::FetchFailed { .. }
                | CycleReport::StoreUnavailable { .. }
                | CycleReport::PublishFailed { .. }
                | CycleReport::PersistFailed { .. }
        )
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleReport::Unchanged { fingerprint, .. } => {
                write!(f, "unchanged ({})", fingerprint.short())
            }
            CycleReport::Published {
                post_id,
                fingerprint,
                ..
            } => write!(f, "published {post_id} ({})", fingerprint.short()),
            CycleReport::Skipped { reason, .. } => write!(f, "skipped: {reason}"),
            CycleReport::Checked {
                changed,
                fingerprint,
                ..
            } => {
                let verdict = if *changed { "changed" } else { "unchanged" };
                write!(f, "{verdict} ({})", fingerprint.short())
            }
            CycleReport::FetchFailed { error } => write!(f, "fetch failed: {error}"),
            CycleReport::StoreUnavailable { error } => write!(f, "store unavailable: {error}"),
            CycleReport::PublishFailed { error, .. } => write!(f, "publish failed: {error}"),
            CycleReport::PersistFailed { post_id, error, .. } => {
                write!(f, "published {post_id} but not persisted: {error}")
            }
        }
    }
}

/// Run one cycle for `feed`. With `dry_run`, stop after detection.
pub async fn run_cycle(ctx: &AppContext, feed: &FeedRuntime, dry_run: bool) -> CycleReport {
    let name = feed.name.as_str();

    let snapshot = match feed.source.fetch().await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            log::warn!("[{name}] Fetch failed: {error}");
            return CycleReport::FetchFailed { error };
        }
    };
    let countdown = snapshot.min_countdown();
    log::debug!(
        "[{name}] Snapshot: {} categories, {} items",
        snapshot.categories.len(),
        snapshot.item_count()
    );

    let detection = match ctx.detector.has_changed(name, &snapshot).await {
        Ok(detection) => detection,
        Err(error) => {
            log::error!("[{name}] {error}");
            return CycleReport::StoreUnavailable { error };
        }
    };
    let fingerprint = detection.fingerprint;

    if dry_run {
        return CycleReport::Checked {
            changed: detection.changed,
            fingerprint,
            countdown,
        };
    }
    if !detection.changed {
        return CycleReport::Unchanged {
            fingerprint,
            countdown,
        };
    }

    let now = Utc::now().with_timezone(&feed.plan.tz);
    let message = ctx.composer.compose(&feed.title, &snapshot, now);
    let post = Post::new(message, feed.media.clone());

    match ctx.publisher.publish(&post).await {
        Ok(PublishOutcome::Posted { id }) => match ctx.store.save(name, &fingerprint).await {
            Ok(()) => CycleReport::Published {
                post_id: id,
                fingerprint,
                countdown,
            },
            Err(error) => {
                log::error!("[{name}] {error}");
                CycleReport::PersistFailed {
                    post_id: id,
                    error,
                    countdown,
                }
            }
        },
        Ok(PublishOutcome::Skipped { reason }) => CycleReport::Skipped { reason, countdown },
        Err(error) => {
            log::error!("[{name}] Publish failed, will retry next cycle: {error}");
            CycleReport::PublishFailed { error, countdown }
        }
    }
}

/// Scheduler-facing wrapper running cycles for one feed.
pub struct FeedWorker {
    ctx: Arc<AppContext>,
    feed: FeedRuntime,
}

impl FeedWorker {
    pub fn new(ctx: Arc<AppContext>, feed: FeedRuntime) -> Self {
        Self { ctx, feed }
    }

    pub fn feed(&self) -> &FeedRuntime {
        &self.feed
    }
}

#[async_trait]
impl CycleRunner for FeedWorker {
    async fn fire(&self) -> CycleReport {
        let started = Instant::now();
        let report = run_cycle(&self.ctx, &self.feed, false).await;
        let elapsed = started.elapsed().as_millis();
        if report.is_failure() {
            log::warn!("[{}] Cycle {report} in {elapsed}ms", self.feed.name);
        } else {
            log::info!("[{}] Cycle {report} in {elapsed}ms", self.feed.name);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Config, Item, MessageConfig, Snapshot};
    use crate::pipeline::normalize::fingerprint;
    use crate::pipeline::scheduler::SchedulePlan;
    use crate::services::{Composer, Publisher, SnapshotSource, SummaryComposer};
    use crate::storage::{FingerprintStore, MemoryFingerprintStore};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Serves queued fetch results in order.
    struct QueuedSource {
        queue: Mutex<VecDeque<Result<Snapshot, FetchError>>>,
    }

    impl QueuedSource {
        fn new(results: Vec<Result<Snapshot, FetchError>>) -> Box<Self> {
            Box::new(Self {
                queue: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl SnapshotSource for QueuedSource {
        fn describe(&self) -> String {
            "queued".into()
        }

        async fn fetch(&self) -> Result<Snapshot, FetchError> {
            self.queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Closed { url: "queued".into() }))
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Post,
        Fail,
        Skip,
    }

    struct FakePublisher {
        mode: Mutex<Mode>,
        posts: Mutex<Vec<Post>>,
    }

    impl FakePublisher {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode: Mutex::new(mode),
                posts: Mutex::new(Vec::new()),
            })
        }

        fn set_mode(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn posted(&self) -> Vec<Post> {
            self.posts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, post: &Post) -> Result<PublishOutcome, PublishError> {
            let mode = *self.mode.lock().unwrap();
            match mode {
                Mode::Post => {
                    let mut posts = self.posts.lock().unwrap();
                    posts.push(post.clone());
                    Ok(PublishOutcome::Posted {
                        id: format!("post-{}", posts.len()),
                    })
                }
                Mode::Fail => Err(PublishError::Status {
                    status: 503,
                    body: "unavailable".into(),
                }),
                Mode::Skip => Ok(PublishOutcome::Skipped {
                    reason: "no media configured".into(),
                }),
            }
        }
    }

    /// Store whose reads or writes always fail.
    struct BrokenStore {
        fail_reads: bool,
    }

    #[async_trait]
    impl FingerprintStore for BrokenStore {
        async fn load(&self, feed: &str) -> Result<Option<Fingerprint>, PersistenceError> {
            if self.fail_reads {
                Err(PersistenceError::Read {
                    feed: feed.into(),
                    source: std::io::Error::other("disk on fire"),
                })
            } else {
                Ok(None)
            }
        }

        async fn save(&self, feed: &str, _: &Fingerprint) -> Result<(), PersistenceError> {
            Err(PersistenceError::Write {
                feed: feed.into(),
                source: std::io::Error::other("read-only"),
            })
        }
    }

    fn context(store: Arc<dyn FingerprintStore>, publisher: Arc<FakePublisher>) -> AppContext {
        let composer: Arc<dyn Composer> =
            Arc::new(SummaryComposer::new(MessageConfig::default()));
        AppContext::new(
            Arc::new(Config::default()),
            reqwest::Client::new(),
            store,
            publisher,
            composer,
        )
    }

    fn feed(results: Vec<Result<Snapshot, FetchError>>) -> FeedRuntime {
        FeedRuntime {
            name: "stock".into(),
            title: "Shop Update".into(),
            media: Some(PathBuf::from("banner.png")),
            plan: SchedulePlan::default(),
            source: QueuedSource::new(results),
        }
    }

    fn stock(carrots: u64, updated_at: &str) -> Snapshot {
        let mut snapshot = Snapshot::default().with_category(
            "seed",
            Category::with_items(vec![Item::new("Carrot", carrots)])
                .countdown(Duration::from_secs(120)),
        );
        snapshot.updated_at = Some(updated_at.into());
        snapshot
    }

    fn fetch_failure() -> FetchError {
        FetchError::Timeout {
            url: "wss://stock".into(),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_publishes_once_per_distinct_content() {
        let store = Arc::new(MemoryFingerprintStore::new());
        let publisher = FakePublisher::new(Mode::Post);
        let ctx = context(store.clone(), publisher.clone());
        let h1 = fingerprint(&stock(5, "t0"));
        let h2 = fingerprint(&stock(6, "t2"));
        let feed = feed(vec![Ok(stock(5, "t0")), Ok(stock(5, "t1")), Ok(stock(6, "t2"))]);

        let first = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(first, CycleReport::Published { ref fingerprint, .. } if *fingerprint == h1));
        assert_eq!(store.load("stock").await.unwrap(), Some(h1.clone()));

        let second = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(second, CycleReport::Unchanged { ref fingerprint, .. } if *fingerprint == h1));

        let third = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(third, CycleReport::Published { ref fingerprint, .. } if *fingerprint == h2));
        assert_eq!(store.load("stock").await.unwrap(), Some(h2));

        let posts = publisher.posted();
        assert_eq!(posts.len(), 2);
        assert!(posts[0].message.starts_with("Shop Update"));
        assert!(posts[0].message.contains("Carrot x5"));
        assert!(posts[1].message.contains("Carrot x6"));
        assert_eq!(posts[0].media, Some(PathBuf::from("banner.png")));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_fingerprint() {
        let store = Arc::new(MemoryFingerprintStore::new());
        let publisher = FakePublisher::new(Mode::Fail);
        let ctx = context(store.clone(), publisher.clone());
        let feed = feed(vec![Ok(stock(5, "t0")), Ok(stock(5, "t1"))]);

        let report = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(report, CycleReport::PublishFailed { .. }));
        assert!(report.is_failure());
        assert_eq!(report.countdown(), Some(Duration::from_secs(120)));
        assert_eq!(store.load("stock").await.unwrap(), None);

        // Same content is retried on the next cycle
        publisher.set_mode(Mode::Post);
        let report = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(report, CycleReport::Published { .. }));
        assert_eq!(publisher.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_publish_keeps_fingerprint() {
        let store = Arc::new(MemoryFingerprintStore::new());
        let ctx = context(store.clone(), FakePublisher::new(Mode::Skip));
        let feed = feed(vec![Ok(stock(5, "t0"))]);

        let report = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(report, CycleReport::Skipped { .. }));
        assert!(!report.is_failure());
        assert_eq!(store.load("stock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_failure_touches_nothing() {
        let store = Arc::new(MemoryFingerprintStore::new());
        let publisher = FakePublisher::new(Mode::Post);
        let ctx = context(store.clone(), publisher.clone());
        let feed = feed(vec![Err(fetch_failure())]);

        let report = run_cycle(&ctx, &feed, false).await;
        assert!(matches!(report, CycleReport::FetchFailed { .. }));
        assert_eq!(report.countdown(), None);
        assert!(publisher.posted().is_empty());
        assert_eq!(store.load("stock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dry_run_stops_after_detection() {
        let store = Arc::new(MemoryFingerprintStore::new());
        let publisher = FakePublisher::new(Mode::Post);
        let ctx = context(store.clone(), publisher.clone());
        let feed = feed(vec![Ok(stock(5, "t0"))]);

        let report = run_cycle(&ctx, &feed, true).await;
        assert!(matches!(report, CycleReport::Checked { changed: true, .. }));
        assert!(publisher.posted().is_empty());
        assert_eq!(store.load("stock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failures() {
        let publisher = FakePublisher::new(Mode::Post);
        let ctx = context(Arc::new(BrokenStore { fail_reads: true }), publisher.clone());
        let report = run_cycle(&ctx, &feed(vec![Ok(stock(5, "t0"))]), false).await;
        assert!(matches!(report, CycleReport::StoreUnavailable { .. }));
        assert!(publisher.posted().is_empty());

        let ctx = context(Arc::new(BrokenStore { fail_reads: false }), publisher.clone());
        let report = run_cycle(&ctx, &feed(vec![Ok(stock(5, "t0"))]), false).await;
        assert!(matches!(report, CycleReport::PersistFailed { .. }));
        assert_eq!(publisher.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_worker_fires_cycles() {
        let store = Arc::new(MemoryFingerprintStore::new());
        let publisher = FakePublisher::new(Mode::Post);
        let ctx = Arc::new(context(store, publisher.clone()));
        let worker = FeedWorker::new(ctx, feed(vec![Ok(stock(5, "t0"))]));

        let report = worker.fire().await;
        assert_eq!(report.to_string(), format!("published post-1 ({})", fingerprint(&stock(5, "t0")).short()));
        assert_eq!(worker.feed().name, "stock");
    }
}
