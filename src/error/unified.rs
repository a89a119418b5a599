//! Error classification and recovery.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Static wiring defect (unknown agent, invalid handoff target).
    Configuration,
    /// A decision object claimed routing capability but yielded no target.
    Protocol,
    /// Malformed history entry or tool arguments.
    Validation,
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Backend,
    Serialization,
    ToolExecution,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    CheckDecisionSchema,
    FixHistory,
    IncreaseTimeout,
    CheckToolImplementation,
    ContactSupport,
}
