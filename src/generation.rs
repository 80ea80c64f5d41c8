//! The seam between the proxy and whatever produces the assistant's text.

use std::fmt;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, TryStreamExt};

use crate::config::ResponseMode;
use crate::error::{ChatError, Result};
use crate::Message;

/// Incremental text chunks, in generation order.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A generation call's outcome, shaped by the response mode it was asked for.
pub enum Generation {
    Full(String),
    Stream(TextStream),
}

impl Generation {
    /// Drains a stream into one string; a full answer is returned as is.
    pub async fn into_text(self) -> Result<String> {
        match self {
            Generation::Full(text) => Ok(text),
            Generation::Stream(stream) => {
                stream
                    .try_fold(String::new(), |mut acc, chunk| async move {
                        acc.push_str(&chunk);
                        Ok(acc)
                    })
                    .await
            }
        }
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::Full(text) => f.debug_tuple("Full").field(text).finish(),
            Generation::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What the generation service is asked to continue.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub system_prompt: String,
    /// Full conversation, oldest first, ending with a user turn.
    pub history: Vec<Message>,
}

impl GenerationRequest {
    /// Builds a request, refusing histories without a non-empty user turn.
    pub fn new(
        model_id: impl Into<String>,
        system_prompt: impl Into<String>,
        history: Vec<Message>,
    ) -> Result<Self> {
        if last_user_message(&history).is_none() {
            return Err(ChatError::no_user_message());
        }
        Ok(Self {
            model_id: model_id.into(),
            system_prompt: system_prompt.into(),
            history,
        })
    }

    pub fn prompt(&self) -> &str {
        last_user_message(&self.history)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// The most recent user turn, provided it has something to say.
pub fn last_user_message(history: &[Message]) -> Option<&Message> {
    history
        .iter()
        .rev()
        .find(|m| m.is_user())
        .filter(|m| !m.content.trim().is_empty())
}

/// A text-generation backend.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        request: GenerationRequest,
        mode: ResponseMode,
    ) -> BoxFuture<'_, Result<Generation>>;
}
