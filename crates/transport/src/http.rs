use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use shared::{ChatSettings, FallbackReply};
use std::time::Duration;

use crate::backend::{ByteStream, ChatBackend};
use crate::error::TransportError;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The KYN backend over HTTP: `POST {"message": ...}` to either endpoint.
///
/// Only the blocking request carries a total deadline. A stream may run as long
/// as the backend keeps producing frames.
pub struct HttpBackend {
    http: Client,
    stream_url: String,
    simple_url: String,
    streaming: bool,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(settings: &ChatSettings) -> Result<Self, TransportError> {
        let request_timeout = settings.request_timeout();
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .pool_max_idle_per_host(2)
            .build()?;
        Ok(Self {
            http,
            stream_url: settings.stream_url(),
            simple_url: settings.simple_url(),
            streaming: settings.streaming,
            request_timeout,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn open_stream(&self, message: &str) -> Result<ByteStream, TransportError> {
        let resp = self
            .http
            .post(&self.stream_url)
            .header("Content-Type", "application/json")
            .json(&ChatRequest { message })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            return Err(TransportError::Status {
                status: status.as_u16(),
                detail,
            });
        }
        tracing::debug!(url = %self.stream_url, "stream opened");

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(TransportError::from))
            .boxed())
    }

    async fn send_simple(&self, message: &str) -> Result<FallbackReply, TransportError> {
        let resp = self
            .http
            .post(&self.simple_url)
            .timeout(self.request_timeout)
            .header("Content-Type", "application/json")
            .json(&ChatRequest { message })
            .send()
            .await?;
        // The status is not inspected: error replies still carry a JSON body.
        let status = resp.status();
        let body = resp.bytes().await?;
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        tracing::debug!(%status, "simple reply received");
        Ok(FallbackReply::from_value(&value))
    }
}
