//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::url::has_scheme;

const SECONDS_PER_DAY: u64 = 86_400;

/// Environment variables that override publisher credentials.
pub const ENV_PAGE_ID: &str = "STOCKWATCH_PAGE_ID";
pub const ENV_ACCESS_TOKEN: &str = "STOCKWATCH_ACCESS_TOKEN";
pub const ENV_SHORT_LIVED_TOKEN: &str = "STOCKWATCH_SHORT_LIVED_TOKEN";
pub const ENV_APP_ID: &str = "STOCKWATCH_APP_ID";
pub const ENV_APP_SECRET: &str = "STOCKWATCH_APP_SECRET";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client and fetch behaviour
    #[serde(default)]
    pub http: HttpConfig,

    /// Default schedule for feeds without their own
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Graph API credentials and retry policy
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Message composition settings
    #[serde(default)]
    pub message: MessageConfig,

    /// Fingerprint persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Watched feeds
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Override publisher credentials from `STOCKWATCH_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override publisher credentials using `lookup` as the environment.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let publisher = &mut self.publisher;
        let targets: [(&str, &mut Option<String>); 5] = [
            (ENV_PAGE_ID, &mut publisher.page_id),
            (ENV_ACCESS_TOKEN, &mut publisher.access_token),
            (ENV_SHORT_LIVED_TOKEN, &mut publisher.short_lived_token),
            (ENV_APP_ID, &mut publisher.app_id),
            (ENV_APP_SECRET, &mut publisher.app_secret),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                log::debug!("Using {key} from the environment");
                *slot = Some(value.trim().to_string());
            }
        }
    }

    /// Find a feed by name.
    pub fn feed(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name == name)
    }

    /// Schedule that applies to `feed`.
    pub fn schedule_for<'a>(&'a self, feed: &'a FeedConfig) -> &'a ScheduleConfig {
        feed.schedule.as_ref().unwrap_or(&self.schedule)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.retry.max_attempts == 0 {
            return Err(AppError::validation("http.retry.max_attempts must be > 0"));
        }
        if self.publisher.timeout_secs == 0 {
            return Err(AppError::validation("publisher.timeout_secs must be > 0"));
        }
        if self.publisher.retry.max_attempts == 0 {
            return Err(AppError::validation(
                "publisher.retry.max_attempts must be > 0",
            ));
        }
        if !has_scheme(&self.publisher.graph_url, &["http", "https"]) {
            return Err(AppError::validation(format!(
                "publisher.graph_url is not an http(s) URL: {}",
                self.publisher.graph_url
            )));
        }
        self.schedule.validate("schedule")?;

        if self.feeds.is_empty() {
            return Err(AppError::validation("No feeds defined"));
        }
        let mut seen = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !seen.insert(feed.name.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate feed name '{}'",
                    feed.name
                )));
            }
        }
        Ok(())
    }
}

/// HTTP client settings shared by every source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP and WebSocket requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Timeout for a single fetch in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retry policy for a single fetch
    #[serde(default = "defaults::fetch_retry")]
    pub retry: RetryPolicy,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            retry: defaults::fetch_retry(),
        }
    }
}

/// How the next wake-up is chosen after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Next boundary of the wall-clock grid
    #[default]
    Fixed,
    /// Smallest countdown reported by the last snapshot
    Adaptive,
}

/// Scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub mode: ScheduleMode,

    /// Grid spacing in seconds. Must divide one day.
    #[serde(default = "defaults::grid")]
    pub grid_secs: u64,

    /// IANA time zone the grid is aligned to
    #[serde(default = "defaults::timezone")]
    pub timezone: String,

    /// Adaptive mode: added to the countdown
    #[serde(default = "defaults::margin")]
    pub margin_secs: u64,

    /// Adaptive mode: lower bound on the delay
    #[serde(default = "defaults::floor")]
    pub floor_secs: u64,

    /// Adaptive mode: delay when no countdown is known
    #[serde(default = "defaults::fallback")]
    pub fallback_secs: u64,
}

impl ScheduleConfig {
    pub fn grid(&self) -> Duration {
        Duration::from_secs(self.grid_secs)
    }

    pub fn margin(&self) -> Duration {
        Duration::from_secs(self.margin_secs)
    }

    pub fn floor(&self) -> Duration {
        Duration::from_secs(self.floor_secs)
    }

    pub fn fallback(&self) -> Duration {
        Duration::from_secs(self.fallback_secs)
    }

    /// Parse the configured time zone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AppError::config(format!("Unknown time zone '{}'", self.timezone)))
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.grid_secs == 0 {
            return Err(AppError::validation(format!(
                "{section}.grid_secs must be > 0"
            )));
        }
        if SECONDS_PER_DAY % self.grid_secs != 0 {
            return Err(AppError::validation(format!(
                "{section}.grid_secs must divide {SECONDS_PER_DAY}, got {}",
                self.grid_secs
            )));
        }
        if self.fallback_secs == 0 {
            return Err(AppError::validation(format!(
                "{section}.fallback_secs must be > 0"
            )));
        }
        self.tz()
            .map_err(|e| AppError::validation(format!("{section}.timezone: {e}")))?;
        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::default(),
            grid_secs: defaults::grid(),
            timezone: defaults::timezone(),
            margin_secs: defaults::margin(),
            floor_secs: defaults::floor(),
            fallback_secs: defaults::fallback(),
        }
    }
}

/// Graph API publisher settings.
///
/// Either `access_token` (a long-lived page token) or the trio
/// `short_lived_token`, `app_id` and `app_secret` must be present to publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Versioned Graph API base URL
    #[serde(default = "defaults::graph_url")]
    pub graph_url: String,

    #[serde(default)]
    pub page_id: Option<String>,

    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub short_lived_token: Option<String>,

    #[serde(default)]
    pub app_id: Option<String>,

    #[serde(default)]
    pub app_secret: Option<String>,

    /// Timeout for one upload in seconds
    #[serde(default = "defaults::publish_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl PublisherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            graph_url: defaults::graph_url(),
            page_id: None,
            access_token: None,
            short_lived_token: None,
            app_id: None,
            app_secret: None,
            timeout_secs: defaults::publish_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Message composition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    /// Rotating daily tips, one picked per calendar day
    #[serde(default)]
    pub tips: Vec<String>,

    /// Appended to every post
    #[serde(default)]
    pub hashtags: Vec<String>,

    /// Categories listed first, in this order
    #[serde(default = "defaults::category_order")]
    pub category_order: Vec<String>,

    /// `{countdown}` is replaced with the formatted minimum countdown
    #[serde(default = "defaults::countdown_template")]
    pub countdown_template: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            tips: Vec::new(),
            hashtags: Vec::new(),
            category_order: defaults::category_order(),
            countdown_template: defaults::countdown_template(),
        }
    }
}

/// Where fingerprints are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::state_dir")]
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: defaults::state_dir(),
        }
    }
}

/// A watched feed: one primary source plus optional auxiliary sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Identifier, also used as the fingerprint file name
    pub name: String,

    /// Title line of the post (defaults to `name`)
    #[serde(default)]
    pub title: Option<String>,

    pub source: SourceConfig,

    /// Extra sources whose categories are merged in (e.g. weather)
    #[serde(default)]
    pub auxiliary: Vec<SourceConfig>,

    /// Image or video attached to every post
    #[serde(default)]
    pub media_path: Option<PathBuf>,

    /// Overrides the global `[schedule]`
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

impl FeedConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Feed name is empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::validation(format!(
                "Feed name '{}' may only contain ASCII letters, digits, '-' and '_'",
                self.name
            )));
        }
        for source in std::iter::once(&self.source).chain(&self.auxiliary) {
            source
                .validate()
                .map_err(|e| AppError::validation(format!("feed '{}': {e}", self.name)))?;
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate(&format!("feeds.{}.schedule", self.name))?;
        }
        Ok(())
    }
}

/// Where a snapshot comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Plain HTTP GET returning JSON
    Http { url: String },

    /// Connect, send `request`, read one JSON message, close
    Websocket { url: String, request: String },
}

impl SourceConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            SourceConfig::Http { url } => {
                if url.trim().is_empty() {
                    return Err("source url is empty".into());
                }
                if !has_scheme(url, &["http", "https"]) {
                    return Err(format!("http source needs an http(s) URL, got '{url}'"));
                }
            }
            SourceConfig::Websocket { url, request } => {
                if url.trim().is_empty() {
                    return Err("source url is empty".into());
                }
                if !has_scheme(url, &["ws", "wss"]) {
                    return Err(format!("websocket source needs a ws(s) URL, got '{url}'"));
                }
                if request.trim().is_empty() {
                    return Err("websocket source has an empty request".into());
                }
            }
        }
        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::utils::retry::RetryPolicy;

    // HTTP defaults
    pub fn user_agent() -> String {
        concat!("stockwatch/", env!("CARGO_PKG_VERSION")).into()
    }
    pub fn timeout() -> u64 {
        10
    }
    pub fn fetch_retry() -> RetryPolicy {
        RetryPolicy::linear(2, Duration::from_millis(500))
    }

    // Schedule defaults
    pub fn grid() -> u64 {
        300
    }
    pub fn timezone() -> String {
        "UTC".into()
    }
    pub fn margin() -> u64 {
        1
    }
    pub fn floor() -> u64 {
        1
    }
    pub fn fallback() -> u64 {
        60
    }

    // Publisher defaults
    pub fn graph_url() -> String {
        "https://graph.facebook.com/v19.0".into()
    }
    pub fn publish_timeout() -> u64 {
        60
    }

    // Message defaults
    pub fn category_order() -> Vec<String> {
        ["gear", "seed", "egg", "cosmetic", "event", "merchant"]
            .into_iter()
            .map(String::from)
            .collect()
    }
    pub fn countdown_template() -> String {
        "Next update in {countdown}".into()
    }

    // Storage defaults
    pub fn state_dir() -> PathBuf {
        PathBuf::from("state")
    }
}
