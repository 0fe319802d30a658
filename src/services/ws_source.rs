// src/services/ws_source.rs

//! Snapshot source that asks a WebSocket endpoint once per cycle.
//!
//! Each fetch opens a connection, sends the configured request as a text
//! frame, waits for the first JSON text reply and closes. Ping, pong and
//! binary frames are skipped.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::FetchError;
use crate::models::Snapshot;
use crate::services::source::SnapshotSource;
use crate::utils::url::redact;

pub struct WebSocketSource {
    url: String,
    request: String,
    user_agent: String,
    timeout: Duration,
}

impl WebSocketSource {
    pub fn new(
        url: impl Into<String>,
        request: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            request: request.into(),
            user_agent: user_agent.into(),
            timeout,
        }
    }

    async fn exchange(&self) -> Result<String, FetchError> {
        let url = redact(&self.url);
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| FetchError::websocket(&url, e))?;
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            request.headers_mut().insert(USER_AGENT, value);
        }

        let (mut stream, _) = connect_async(request)
            .await
            .map_err(|e| FetchError::websocket(&url, e))?;
        log::debug!("Connected to {url}");

        stream
            .send(Message::Text(self.request.clone()))
            .await
            .map_err(|e| FetchError::websocket(&url, e))?;

        let reply = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FetchError::Closed { url });
                }
                Some(Ok(other)) => {
                    log::trace!("Skipping {} byte frame from {url}", other.len());
                }
                Some(Err(e)) => return Err(FetchError::websocket(&url, e)),
            }
        };

        if let Err(e) = stream.close(None).await {
            log::debug!("Close handshake with {url} failed: {e}");
        }
        Ok(reply)
    }
}

#[async_trait]
impl SnapshotSource for WebSocketSource {
    fn describe(&self) -> String {
        format!("WS {} ({})", redact(&self.url), self.request)
    }

    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let reply = tokio::time::timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| FetchError::Timeout {
                url: redact(&self.url),
                timeout: self.timeout,
            })??;

        Snapshot::from_json(&reply).map_err(|e| FetchError::malformed(redact(&self.url), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Serve one connection: expect `expected`, answer with `frames`.
    async fn serve_once(expected: &'static str, frames: Vec<Message>, hang: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Text(text))) => assert_eq!(text, expected),
                other => panic!("unexpected first frame: {other:?}"),
            }
            for frame in frames {
                ws.send(frame).await.unwrap();
            }
            if hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            // Drain until the client closes
            while let Some(Ok(_)) = ws.next().await {}
        });

        format!("ws://{addr}/")
    }

    #[tokio::test]
    async fn test_request_response() {
        let url = serve_once(
            "getStock",
            vec![
                Message::Ping(vec![1, 2]),
                Message::Binary(vec![0xde, 0xad]),
                Message::Text(r#"{"data":{"egg":[{"name":"Bug Egg","quantity":2}]}}"#.into()),
            ],
            false,
        )
        .await;

        let source = WebSocketSource::new(url, "getStock", "stockwatch-test", Duration::from_secs(5));
        let snapshot = source.fetch().await.unwrap();
        assert_eq!(
            snapshot.category("egg").unwrap().items[0].name,
            "Bug Egg"
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let url = serve_once("getStock", Vec::new(), true).await;

        let source =
            WebSocketSource::new(url, "getStock", "stockwatch-test", Duration::from_millis(200));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_close_before_reply() {
        let url = serve_once("getStock", vec![Message::Close(None)], false).await;

        let source = WebSocketSource::new(url, "getStock", "stockwatch-test", Duration::from_secs(5));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let url = serve_once("getStock", vec![Message::Text("not json".into())], false).await;

        let source = WebSocketSource::new(url, "getStock", "stockwatch-test", Duration::from_secs(5));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = WebSocketSource::new(
            format!("ws://{addr}/"),
            "getStock",
            "stockwatch-test",
            Duration::from_secs(5),
        );
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::WebSocket { .. }));
    }
}
