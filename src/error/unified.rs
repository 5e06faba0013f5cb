//! Error classification shared by retry, logging and turn termination.

use strum::Display;

/// What kind of failure an error represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Api,
    Stream,
    Configuration,
    Serialization,
    Validation,
    ToolExecution,
    Canceled,
    Unknown,
}

impl ErrorCategory {
    /// Failures that may succeed if the same call is repeated.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Timeout | Self::Server
        )
    }
}
