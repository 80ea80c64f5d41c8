// Defaults, overridable from the environment (a .env file is loaded at startup).

use std::env;

pub const DEFAULT_PERSONA: &str = "You are a helpful, funny, semi-sarcastic, semi-sardonic, AI assistant that motivates the user to stop procrastinating and get things done.";

pub const CHAT_ROUTE: &str = "/api/chat";

pub const DEFAULT_PORT: u16 = 3000;

/// Upper bound on a single chat exchange, in seconds.
pub const DEFAULT_MAX_DURATION_SECS: u64 = 30;

// Widget copy.
pub const EMPTY_REPLY_FALLBACK: &str = "I'm here to help!";
pub const ERROR_FALLBACK: &str = "Sorry, I encountered an error. Please try again.";
pub const EMPTY_TRANSCRIPT_PLACEHOLDER: &str = "Start a conversation with the AI assistant";
pub const STATUS_THINKING: &str = "Thinking...";
pub const STATUS_ONLINE: &str = "Online";

lazy_static::lazy_static! {
    pub static ref GEMINI_API_BASE: String = env::var("CHATRELAY_API_BASE").unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref CHAT_MODEL: String = env::var("CHATRELAY_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-exp".to_string());
    pub static ref DEFAULT_PROXY_URL: String = format!("http://127.0.0.1:{}{}", DEFAULT_PORT, CHAT_ROUTE);
}
