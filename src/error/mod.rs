//! Error types for Scriptorium.

pub mod unified;

pub use unified::ErrorCategory;

use thiserror::Error;

/// Primary error type for all Scriptorium operations.
#[derive(Error, Debug)]
pub enum ScriptoriumError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Tool temporarily unavailable: {tool_name}: {message}")]
    ToolUnavailable { tool_name: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Canceled")]
    Canceled,
}

impl ScriptoriumError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Transient handler failure (network, database unreachable). Retried by the executor.
    pub fn tool_unavailable(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Terminal handler failure. Never retried.
    pub fn tool_failed(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) | Self::ToolUnavailable { .. } => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) | Self::ConfigParse(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::Stream(_) => ErrorCategory::Stream,
            Self::InvalidArgument(_) | Self::InvalidMode(_) => ErrorCategory::Validation,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Canceled => ErrorCategory::Canceled,
            Self::Io(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        self.category().is_transient()
    }

    /// Sentence shown to the user when this error ends a turn.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Authentication => {
                "I couldn't reach the language model because its credentials were rejected. Please check the API key configuration.".to_string()
            }
            ErrorCategory::RateLimit => {
                "The language model is receiving too many requests right now. Please try again in a moment.".to_string()
            }
            ErrorCategory::Network | ErrorCategory::Timeout => {
                "I lost the connection to the language model before I could finish. Please try again.".to_string()
            }
            ErrorCategory::Server => {
                "The language model service had an internal problem. Please try again shortly.".to_string()
            }
            ErrorCategory::Configuration => {
                "The assistant is not configured correctly. Please check the model endpoint settings.".to_string()
            }
            ErrorCategory::Canceled => "The request was canceled.".to_string(),
            _ => "Something went wrong while talking to the language model. Please try again.".to_string(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ScriptoriumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_and_transient_tool_errors_are_retryable() {
        assert!(ScriptoriumError::api(503, "overloaded").is_retryable());
        assert!(ScriptoriumError::Timeout(100).is_retryable());
        assert!(ScriptoriumError::tool_unavailable("read_source", "db down").is_retryable());
    }

    #[test]
    fn validation_and_terminal_tool_errors_are_not_retryable() {
        assert!(!ScriptoriumError::InvalidArgument("content_id".into()).is_retryable());
        assert!(!ScriptoriumError::tool_failed("edit_section", "no such section").is_retryable());
        assert!(!ScriptoriumError::api(400, "bad request").is_retryable());
    }

    #[test]
    fn auth_status_codes_map_to_authentication_category() {
        assert_eq!(
            ScriptoriumError::api(401, "nope").category(),
            ErrorCategory::Authentication
        );
        assert!(ScriptoriumError::api(403, "nope")
            .user_message()
            .contains("credentials"));
    }
}
