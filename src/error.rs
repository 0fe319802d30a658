// src/error.rs

//! Unified error handling for the stock watcher.
//!
//! The three domain errors map onto the recovery policy of a cycle:
//! - [`FetchError`]: the cycle is skipped, the scheduler re-arms as usual.
//! - [`PublishError`]: the fingerprint is not advanced, the content is retried next cycle.
//! - [`PersistenceError`]: fatal for the current cycle only.
//!
//! [`AppError`] covers everything outside a cycle (config, CLI, startup I/O).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Result type alias for application operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Failure to retrieve a snapshot from an upstream source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("WebSocket error for {url}: {message}")]
    WebSocket { url: String, message: String },

    #[error("connection to {url} closed before a response arrived")]
    Closed { url: String },

    #[error("malformed payload from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl FetchError {
    /// Create a malformed-payload error.
    pub fn malformed(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a WebSocket transport error.
    pub fn websocket(url: impl Into<String>, message: impl ToString) -> Self {
        Self::WebSocket {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Closed { .. } => true,
            FetchError::WebSocket { .. } => true,
            FetchError::Http { source, .. } => is_transient_reqwest(source),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Malformed { .. } => false,
        }
    }
}

/// Failure to publish a post.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("missing or rejected credentials: {0}")]
    Auth(String),

    #[error("publish request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited by the publish endpoint")]
    RateLimited,

    #[error("publish endpoint answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected publish response: {0}")]
    Response(String),

    #[error("failed to read media {path}: {source}")]
    Media {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Retryable for PublishError {
    fn is_transient(&self) -> bool {
        match self {
            PublishError::Network(e) => is_transient_reqwest(e),
            PublishError::RateLimited => true,
            PublishError::Status { status, .. } => *status >= 500,
            PublishError::Auth(_) | PublishError::Response(_) | PublishError::Media { .. } => false,
        }
    }
}

/// Failure to read or write the persisted fingerprint.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to read fingerprint for feed '{feed}': {source}")]
    Read {
        feed: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write fingerprint for feed '{feed}': {source}")]
    Write {
        feed: String,
        #[source]
        source: std::io::Error,
    },
}

/// Connect, timeout, request and body errors are worth another attempt.
fn is_transient_reqwest(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
}
