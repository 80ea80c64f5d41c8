use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong during one chat exchange, on either side of the proxy.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request carried nothing the model could answer.
    #[error("{0}")]
    ClientInput(String),

    #[error("{0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// The generation service failed or answered with something unusable.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Network(#[from] reqwest::Error),

    /// The proxy answered with an error envelope or a non-2xx status.
    #[error("{0}")]
    Rejected(String),

    #[error("chat exchange exceeded the {}s duration limit", .0.as_secs())]
    Timeout(Duration),
}

impl ChatError {
    pub fn no_user_message() -> Self {
        ChatError::ClientInput("No user message found".to_string())
    }

    pub fn is_client_input(&self) -> bool {
        matches!(self, ChatError::ClientInput(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_user_message_text() {
        let err = ChatError::no_user_message();
        assert!(err.is_client_input());
        assert_eq!(err.to_string(), "No user message found");
    }

    #[test]
    fn test_timeout_message_names_limit() {
        let err = ChatError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "chat exchange exceeded the 30s duration limit");
        assert!(!err.is_client_input());
    }

    #[test]
    fn test_malformed_payload_keeps_diagnostic() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = ChatError::from(parse_err);
        assert!(matches!(err, ChatError::MalformedPayload(_)));
        assert!(err.to_string().contains("key must be a string"));
    }
}
