//! Error types for callflow.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all callflow operations.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Invalid handoff target '{target}' from agent '{source_agent}': not an agent or 'end'")]
    InvalidHandoffTarget { source_agent: String, target: String },

    #[error("Protocol violation: agent '{agent}' decided '{decision}' with no next step")]
    ProtocolViolation { agent: String, decision: String },

    #[error("Malformed history entry: {0}")]
    MalformedEntry(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FlowError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_)
            | Self::UnknownAgent(_)
            | Self::InvalidHandoffTarget { .. } => ErrorCategory::Configuration,
            Self::ProtocolViolation { .. } => ErrorCategory::Protocol,
            Self::MalformedEntry(_) | Self::InvalidArgument(_) => ErrorCategory::Validation,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) | Self::Io(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Backend,
            },
            Self::Backend(_) => ErrorCategory::Backend,
        }
    }

    /// Whether this error is potentially retryable by a layer above the core.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Whether this error indicates a static wiring defect.
    pub fn is_fatal_misconfiguration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit
            | ErrorCategory::Network
            | ErrorCategory::Server => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Protocol => RecoverySuggestion::CheckDecisionSchema,
            ErrorCategory::Validation => RecoverySuggestion::FixHistory,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolImplementation,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, FlowError>;
