// src/services/publisher.rs

//! Graph API publisher.
//!
//! Posts a photo or video with a caption to a page. The page token is either
//! configured directly or exchanged once from a short-lived token and then
//! cached for the lifetime of the process.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mime_guess::mime;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::PublishError;
use crate::models::PublisherConfig;
use crate::utils::retry::retry_with_backoff;
use crate::utils::url::endpoint;

/// Something to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub message: String,
    pub media: Option<PathBuf>,
}

impl Post {
    pub fn new(message: impl Into<String>, media: Option<PathBuf>) -> Self {
        Self {
            message: message.into(),
            media,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The sink accepted the post
    Posted { id: String },
    /// Nothing was sent
    Skipped { reason: String },
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &Post) -> Result<PublishOutcome, PublishError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn edge(self) -> &'static str {
        match self {
            MediaKind::Image => "photos",
            MediaKind::Video => "videos",
        }
    }

    fn caption_field(self) -> &'static str {
        match self {
            MediaKind::Image => "message",
            MediaKind::Video => "description",
        }
    }
}

struct Media {
    kind: MediaKind,
    mime: String,
    file_name: String,
    bytes: Vec<u8>,
}

impl Media {
    /// Read the file, or `None` if it does not exist.
    async fn load(path: &Path) -> Result<Option<Self>, PublishError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PublishError::Media {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let guessed = mime_guess::from_path(path).first_or_octet_stream();
        let kind = if guessed.type_() == mime::VIDEO {
            MediaKind::Video
        } else {
            MediaKind::Image
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());

        Ok(Some(Self {
            kind,
            mime: guessed.essence_str().to_string(),
            file_name,
            bytes,
        }))
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct PostResponse {
    id: Option<String>,
    post_id: Option<String>,
}

pub struct GraphPublisher {
    config: PublisherConfig,
    client: Client,
    page_token: OnceCell<String>,
}

impl GraphPublisher {
    pub fn new(config: PublisherConfig, client: Client) -> Self {
        Self {
            config,
            client,
            page_token: OnceCell::new(),
        }
    }

    /// The page token, exchanging credentials on first use.
    async fn page_token(&self) -> Result<&str, PublishError> {
        let token = self
            .page_token
            .get_or_try_init(|| async {
                if let Some(token) = self.config.access_token.as_deref() {
                    return Ok(token.to_string());
                }
                self.exchange_token().await
            })
            .await?;
        Ok(token.as_str())
    }

    async fn exchange_token(&self) -> Result<String, PublishError> {
        let (Some(short_lived), Some(app_id), Some(app_secret)) = (
            self.config.short_lived_token.as_deref(),
            self.config.app_id.as_deref(),
            self.config.app_secret.as_deref(),
        ) else {
            return Err(PublishError::Auth(
                "set publisher.access_token, or short_lived_token with app_id and app_secret"
                    .into(),
            ));
        };

        let url = endpoint(&self.config.graph_url, &["oauth", "access_token"]);
        let url = url.as_str();
        let token = retry_with_backoff(&self.config.retry, "token exchange", |_| async move {
            let response = self
                .client
                .get(url)
                .query(&[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", app_id),
                    ("client_secret", app_secret),
                    ("fb_exchange_token", short_lived),
                ])
                .timeout(self.config.timeout())
                .send()
                .await?;
            let body: TokenResponse = decode(response).await?;
            Ok::<_, PublishError>(body.access_token)
        })
        .await
        .map_err(|failure| failure.error)?;

        log::info!("Exchanged short-lived token for a long-lived token");
        Ok(token)
    }

    async fn upload(
        &self,
        token: &str,
        page_id: &str,
        post: &Post,
        media: &Media,
    ) -> Result<String, PublishError> {
        let url = endpoint(&self.config.graph_url, &[page_id, media.kind.edge()]);
        retry_with_backoff(&self.config.retry, "publish", |attempt| {
            let url = url.clone();
            async move {
                log::debug!(
                    "Uploading {} to {} (attempt {attempt})",
                    media.file_name,
                    media.kind.edge()
                );
                let source = Part::bytes(media.bytes.clone())
                    .file_name(media.file_name.clone())
                    .mime_str(&media.mime)
                    .map_err(|e| PublishError::Response(format!("invalid media type: {e}")))?;
                let form = Form::new()
                    .text(media.kind.caption_field(), post.message.clone())
                    .text("access_token", token.to_string())
                    .part("source", source);

                let response = self
                    .client
                    .post(&url)
                    .multipart(form)
                    .timeout(self.config.timeout())
                    .send()
                    .await?;
                let body: PostResponse = decode(response).await?;
                body.id
                    .or(body.post_id)
                    .ok_or_else(|| PublishError::Response("response has no id".into()))
            }
        })
        .await
        .map_err(|failure| failure.error)
    }
}

#[async_trait]
impl Publisher for GraphPublisher {
    async fn publish(&self, post: &Post) -> Result<PublishOutcome, PublishError> {
        let Some(path) = post.media.as_deref() else {
            log::info!("No media configured, skipping publish");
            return Ok(PublishOutcome::Skipped {
                reason: "no media configured".into(),
            });
        };
        let Some(media) = Media::load(path).await? else {
            log::info!("Media {path:?} not found, skipping publish");
            return Ok(PublishOutcome::Skipped {
                reason: format!("media {} not found", path.display()),
            });
        };

        let page_id = self
            .config
            .page_id
            .as_deref()
            .ok_or_else(|| PublishError::Auth("publisher.page_id is not set".into()))?;
        let token = self.page_token().await?;

        let id = self.upload(token, page_id, post, &media).await?;
        log::info!("Published post {id}");
        Ok(PublishOutcome::Posted { id })
    }
}

/// Map the status, then decode the JSON body.
async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, PublishError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PublishError::RateLimited);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PublishError::Status {
            status: status.as_u16(),
            body: truncate(&body, 300),
        });
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| PublishError::Response(e.to_string()))
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::retry::RetryPolicy;
    use httpmock::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(server: &MockServer) -> PublisherConfig {
        PublisherConfig {
            graph_url: server.url("/v19.0"),
            page_id: Some("1234".into()),
            access_token: Some("page-token".into()),
            retry: RetryPolicy::linear(3, Duration::from_millis(10)),
            ..PublisherConfig::default()
        }
    }

    fn media_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"fake media bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn test_posts_photo_with_configured_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/photos");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"id":"photo-1","post_id":"1234_99"}"#);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(config(&server), Client::new());
        let post = Post::new("Shop Update", Some(media_file(&dir, "banner.png")));

        let outcome = publisher.publish(&post).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Posted { id: "photo-1".into() });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_video_goes_to_videos_edge() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/videos");
                then.status(200).body(r#"{"id":"video-1"}"#);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(config(&server), Client::new());
        let post = Post::new("Shop Update", Some(media_file(&dir, "clip.mp4")));

        let outcome = publisher.publish(&post).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Posted { id: "video-1".into() });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_exchange_happens_once() {
        let server = MockServer::start_async().await;
        let exchange = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v19.0/oauth/access_token")
                    .query_param("grant_type", "fb_exchange_token")
                    .query_param("client_id", "app")
                    .query_param("fb_exchange_token", "short");
                then.status(200).body(r#"{"access_token":"long","token_type":"bearer"}"#);
            })
            .await;
        let upload = server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/photos");
                then.status(200).body(r#"{"post_id":"1234_1"}"#);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(
            PublisherConfig {
                access_token: None,
                short_lived_token: Some("short".into()),
                app_id: Some("app".into()),
                app_secret: Some("secret".into()),
                ..config(&server)
            },
            Client::new(),
        );
        let post = Post::new("Shop Update", Some(media_file(&dir, "banner.jpg")));

        let (a, b) = tokio::join!(publisher.publish(&post), publisher.publish(&post));
        assert_eq!(a.unwrap(), PublishOutcome::Posted { id: "1234_1".into() });
        assert!(b.is_ok());
        publisher.publish(&post).await.unwrap();

        exchange.assert_calls_async(1).await;
        upload.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_without_retry() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(
            PublisherConfig {
                access_token: None,
                ..config(&server)
            },
            Client::new(),
        );
        let post = Post::new("Shop Update", Some(media_file(&dir, "banner.png")));

        let err = publisher.publish(&post).await.unwrap_err();
        assert!(matches!(err, PublishError::Auth(_)));
    }

    #[tokio::test]
    async fn test_skips_without_media() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(500);
            })
            .await;
        let publisher = GraphPublisher::new(config(&server), Client::new());

        let outcome = publisher.publish(&Post::new("hi", None)).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Skipped { .. }));

        let missing = Post::new("hi", Some(PathBuf::from("/nonexistent/banner.png")));
        let outcome = publisher.publish(&missing).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Skipped { .. }));

        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_exhausted() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/photos");
                then.status(503).body("unavailable");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(config(&server), Client::new());
        let post = Post::new("Shop Update", Some(media_file(&dir, "banner.png")));

        let err = publisher.publish(&post).await.unwrap_err();
        assert!(matches!(err, PublishError::Status { status: 503, .. }));
        mock.assert_calls_async(3).await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/photos");
                then.status(400)
                    .body(r#"{"error":{"message":"Invalid OAuth access token","code":190}}"#);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(config(&server), Client::new());
        let post = Post::new("Shop Update", Some(media_file(&dir, "banner.png")));

        let err = publisher.publish(&post).await.unwrap_err();
        assert!(matches!(err, PublishError::Status { status: 400, .. }));
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let server = MockServer::start_async().await;
        let mut limited = server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/photos");
                then.status(429);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let publisher = GraphPublisher::new(config(&server), Client::new());
        let post = Post::new("Shop Update", Some(media_file(&dir, "banner.png")));

        let err = publisher.publish(&post).await.unwrap_err();
        assert!(matches!(err, PublishError::RateLimited));
        limited.assert_calls_async(3).await;
        limited.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v19.0/1234/photos");
                then.status(200).body(r#"{"id":"photo-2"}"#);
            })
            .await;
        let outcome = publisher.publish(&post).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Posted { id: "photo-2".into() });
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
