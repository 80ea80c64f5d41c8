use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// How the proxy hands the generated text back to the widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Wait for the whole answer and reply once with `{ "message": ... }`.
    #[default]
    Buffered,
    /// Relay text chunks as `text/plain` while the model produces them.
    Streaming,
}

/// Endpoint configuration, fixed at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Persona used when a request carries no `systemPrompt`.
    pub system_prompt: String,
    pub model_id: String,
    pub mode: ResponseMode,
    pub max_duration: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            system_prompt: constants::DEFAULT_PERSONA.to_string(),
            model_id: constants::CHAT_MODEL.clone(),
            mode: ResponseMode::default(),
            max_duration: Duration::from_secs(constants::DEFAULT_MAX_DURATION_SECS),
        }
    }
}

impl ProxyConfig {
    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// A request-supplied prompt wins; blank ones fall back to the configured persona.
    pub fn resolve_system_prompt(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim) {
            Some(prompt) if !prompt.is_empty() => prompt.to_string(),
            _ => self.system_prompt.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.system_prompt, constants::DEFAULT_PERSONA);
        assert_eq!(config.mode, ResponseMode::Buffered);
        assert_eq!(config.max_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ProxyConfig::default()
            .with_mode(ResponseMode::Streaming)
            .with_model("gemini-1.5-pro")
            .with_system_prompt("Be brief.")
            .with_max_duration(Duration::from_secs(5));

        assert_eq!(config.mode, ResponseMode::Streaming);
        assert_eq!(config.model_id, "gemini-1.5-pro");
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.max_duration, Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_system_prompt() {
        let config = ProxyConfig::default().with_system_prompt("Persona");
        assert_eq!(config.resolve_system_prompt(None), "Persona");
        assert_eq!(config.resolve_system_prompt(Some("   ")), "Persona");
        assert_eq!(config.resolve_system_prompt(Some("Pirate")), "Pirate");
    }

    #[test]
    fn test_response_mode_serde() {
        let mode: ResponseMode = serde_json::from_str("\"streaming\"").unwrap();
        assert_eq!(mode, ResponseMode::Streaming);
        assert_eq!(serde_json::to_string(&ResponseMode::Buffered).unwrap(), "\"buffered\"");
    }
}
