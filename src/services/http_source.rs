// src/services/http_source.rs

//! Snapshot source backed by a plain HTTP GET.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::FetchError;
use crate::models::Snapshot;
use crate::services::source::SnapshotSource;
use crate::utils::url::redact;

/// Polls a JSON endpoint.
pub struct HttpSource {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, client: Client, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client,
            timeout,
        }
    }

    fn map_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: redact(&self.url),
                timeout: self.timeout,
            }
        } else {
            FetchError::Http {
                url: redact(&self.url),
                source: error.without_url(),
            }
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    fn describe(&self) -> String {
        format!("GET {}", redact(&self.url))
    }

    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: redact(&self.url),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.map_error(e))?;
        let snapshot =
            Snapshot::from_json(&body).map_err(|e| FetchError::malformed(redact(&self.url), e))?;
        log::debug!(
            "Fetched {} categories from {}",
            snapshot.categories.len(),
            redact(&self.url)
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::retry::Retryable;
    use httpmock::prelude::*;

    fn source(server: &MockServer, path: &str, timeout: Duration) -> HttpSource {
        HttpSource::new(server.url(path), Client::new(), timeout)
    }

    #[tokio::test]
    async fn test_fetch_parses_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/stock");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"data":{"seed":[{"name":"Carrot","quantity":5}],"gear":{"items":[],"countdown":60}}}"#);
            })
            .await;

        let snapshot = source(&server, "/stock", Duration::from_secs(5))
            .fetch()
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(snapshot.category("seed").unwrap().items.len(), 1);
        assert_eq!(snapshot.min_countdown(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stock");
                then.status(503);
            })
            .await;

        let err = source(&server, "/stock", Duration::from_secs(5))
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stock");
                then.status(200).body("<html>oops</html>");
            })
            .await;

        let err = source(&server, "/stock", Duration::from_secs(5))
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stock");
                then.status(200)
                    .body("{}")
                    .delay(Duration::from_millis(500));
            })
            .await;

        let err = source(&server, "/stock", Duration::from_millis(50))
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[test]
    fn test_describe_redacts_query() {
        let source = HttpSource::new(
            "https://api.example.com/stock?key=secret",
            Client::new(),
            Duration::from_secs(1),
        );
        assert_eq!(source.describe(), "GET https://api.example.com/stock?key=***");
    }
}
