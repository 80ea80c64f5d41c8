use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::ResponseMode;
use crate::error::{ChatError, Result};
use crate::generation::{Generation, GenerationRequest, Generator, TextStream};
use crate::{Message, Role};

// Structures matching the Generative Language API's generateContent endpoint
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug)]
struct Part {
    // Non-text parts (inline data, function calls) deserialize with no text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }

    fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        Self {
            role: Some(role.to_string()),
            ..Self::text(&message.content)
        }
    }
}

impl GenerateContentRequest {
    fn from_request(request: &GenerationRequest) -> Self {
        Self {
            system_instruction: Content::text(&request.system_prompt),
            // The API refuses parts without text
            contents: request
                .history
                .iter()
                .filter(|m| !m.content.trim().is_empty())
                .map(Content::from_message)
                .collect(),
        }
    }
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(ChatError::Upstream(err.message));
        }
        let blocked = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason);
        if let Some(reason) = blocked {
            return Err(ChatError::Upstream(format!("Prompt blocked: {}", reason)));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

/// Splits a server-sent-events byte stream into event payloads.
///
/// The `data:` lines of one event are joined with `\n` and handed out when the
/// blank line ending the event arrives. Bytes are buffered until a full line is
/// seen, so payloads and multi-byte characters split across network chunks
/// come out whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                payloads.extend(self.dispatch());
            } else {
                self.accept(line);
            }
        }
        payloads
    }

    /// Flushes an event the stream closed without terminating.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.accept(line.trim_end_matches('\r'));
        }
        self.dispatch()
    }

    // Other fields (event, id, retry) and comments carry nothing we relay
    fn accept(&mut self, line: &str) {
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
        } else if line == "data" {
            self.data.push(String::new());
        }
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}

fn parse_stream_payload(data: &str) -> Result<String> {
    if data == "[DONE]" {
        return Ok(String::new());
    }
    serde_json::from_str::<GenerateContentResponse>(data)
        .map_err(|e| ChatError::Upstream(format!("Malformed stream chunk from generation service: {}", e)))?
        .into_text()
}

/// Client for Google's Generative Language API.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    api_base: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, model_id: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.api_base.trim_end_matches('/'),
            model_id,
            method
        )
    }

    async fn post(&self, url: &str, request: &GenerationRequest) -> Result<reqwest::Response> {
        let payload = GenerateContentRequest::from_request(request);
        debug!(turns = payload.contents.len(), "Constructed generateContent payload");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %error_body, "Generation API request failed");
            let detail = serde_json::from_str::<ApiErrorEnvelope>(&error_body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(error_body);
            return Err(ChatError::Upstream(format!(
                "Generation API request failed with status {}: {}",
                status, detail
            )));
        }
        Ok(response)
    }

    #[instrument(skip(self, request), fields(model = %request.model_id))]
    pub async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let url = self.endpoint(&request.model_id, "generateContent");
        let response = self.post(&url, request).await?;

        let body = response.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            ChatError::Upstream(format!("Failed to parse generation response: {}", e))
        })?;
        let text = parsed.into_text()?;

        debug!(chars = text.len(), "Received generated text");
        Ok(text)
    }

    #[instrument(skip(self, request), fields(model = %request.model_id))]
    pub async fn open_stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&request.model_id, "streamGenerateContent")
        );
        let response = self.post(&url, request).await?;
        debug!("Generation stream opened");

        let mut decoder = SseDecoder::default();
        let chunks = response
            .bytes_stream()
            .map_ok(Some)
            // `None` marks the end of the body so a trailing event is not lost
            .chain(stream::once(future::ready(Ok(None))))
            .map_err(ChatError::from)
            .map_ok(move |bytes| {
                let payloads = match bytes {
                    Some(bytes) => decoder.push(&bytes),
                    None => decoder.finish().into_iter().collect(),
                };
                stream::iter(payloads.into_iter().map(Ok::<_, ChatError>))
            })
            .try_flatten()
            .and_then(|data| future::ready(parse_stream_payload(&data)))
            .try_filter(|text| future::ready(!text.is_empty()))
            .inspect_err(|e| error!("Generation stream error: {}", e));

        Ok(chunks.boxed())
    }
}

impl Generator for GeminiGenerator {
    fn generate(
        &self,
        request: GenerationRequest,
        mode: ResponseMode,
    ) -> BoxFuture<'_, Result<Generation>> {
        async move {
            match mode {
                ResponseMode::Buffered => self.complete(&request).await.map(Generation::Full),
                ResponseMode::Streaming => self.open_stream(&request).await.map(Generation::Stream),
            }
        }
        .boxed()
    }
}
