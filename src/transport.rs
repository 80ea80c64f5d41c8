use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::{ChatError, Result};
use crate::proxy::{ChatRequest, ErrorEnvelope};

/// Called with each text chunk of a streamed reply as it arrives.
pub type ChunkObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// How the widget reaches the proxy.
pub trait ChatTransport: Send + Sync {
    /// Sends the conversation and resolves to the reply text.
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<String>>;
}

// Buffered-mode body; either field may be missing
#[derive(Deserialize, Debug, Default)]
struct ReplyBody {
    message: Option<String>,
    error: Option<String>,
}

/// Decodes as much complete UTF-8 as `pending` holds, keeping a split character for later.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
    pending.drain(..valid);
    text
}

/// Talks to the proxy over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    on_chunk: Option<ChunkObserver>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            on_chunk: None,
        }
    }

    pub fn with_chunk_observer(mut self, observer: ChunkObserver) -> Self {
        self.on_chunk = Some(observer);
        self
    }

    async fn read_stream(&self, response: reqwest::Response) -> Result<String> {
        let mut stream = response.bytes_stream();
        let mut pending = Vec::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);
            let text = drain_utf8(&mut pending);
            if text.is_empty() {
                continue;
            }
            if let Some(observer) = &self.on_chunk {
                observer(&text);
            }
            reply.push_str(&text);
        }

        if !pending.is_empty() {
            warn!("Streamed reply ended inside a UTF-8 sequence");
            reply.push_str(&String::from_utf8_lossy(&pending));
        }
        Ok(reply)
    }

    #[instrument(skip(self, request), fields(url = %self.url, turns = request.messages.len()))]
    async fn exchange(&self, request: ChatRequest) -> Result<String> {
        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .map(|envelope| envelope.error)
                .filter(|error| !error.is_empty())
                .unwrap_or_else(|| format!("Failed to send message: {}", status.as_u16()));
            warn!(%status, "Proxy rejected chat request");
            return Err(ChatError::Rejected(error));
        }

        let is_plain_text = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with("text/plain"))
            .unwrap_or(false);

        if is_plain_text {
            debug!("Reading streamed reply");
            return self.read_stream(response).await;
        }

        let body = response.bytes().await?;
        let reply: ReplyBody = serde_json::from_slice(&body)?;
        match reply.error.filter(|error| !error.is_empty()) {
            Some(error) => Err(ChatError::Rejected(error)),
            None => Ok(reply.message.unwrap_or_default()),
        }
    }
}

impl ChatTransport for HttpTransport {
    fn send(&self, request: ChatRequest) -> BoxFuture<'_, Result<String>> {
        self.exchange(request).boxed()
    }
}
