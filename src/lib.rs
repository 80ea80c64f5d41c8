pub mod chat;
pub mod config;
pub mod constants;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod proxy;
pub mod transcript;
pub mod transport;
pub mod widget;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use config::{ProxyConfig, ResponseMode};
pub use error::ChatError;
pub use generation::{Generation, GenerationRequest, Generator, TextStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "AI Assistant",
        }
    }
}

/// One chat turn as it travels between the widget and the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub content: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            role,
            created_at: Some(Utc::now()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(String::new(), Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(String::new(), Role::Assistant, content)
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}
