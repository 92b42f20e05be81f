//! Error kinds for plancraft operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on `ErrorKind` to decide whether an error is repaired
/// locally (parse/validation), escalated (unknown capability, exhausted
/// repairs) or recorded and ignored (delegate failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to a built-in or skill
    InvalidArgument,

    // =========================================================================
    // Program errors
    // =========================================================================
    /// Model output could not be extracted or parsed as a program
    ParseFailed,

    /// Program violates the turn grammar
    ValidationFailed,

    /// A result reference points at a step that has not produced a result
    InvalidReference,

    // =========================================================================
    // Dispatch errors
    // =========================================================================
    /// Program calls a capability that is not registered
    UnknownCapability,

    /// A delegate invocation failed
    DelegateFailed,

    // =========================================================================
    // Planning errors
    // =========================================================================
    /// Repair attempts exhausted without a valid program
    RepairExhausted,

    /// Turn counter exceeded the configured budget
    BudgetExceeded,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// Network error
    NetworkFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Program
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::ValidationFailed => "ValidationFailed",
            ErrorKind::InvalidReference => "InvalidReference",

            // Dispatch
            ErrorKind::UnknownCapability => "UnknownCapability",
            ErrorKind::DelegateFailed => "DelegateFailed",

            // Planning
            ErrorKind::RepairExhausted => "RepairExhausted",
            ErrorKind::BudgetExceeded => "BudgetExceeded",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::NetworkFailed => "NetworkFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ParseFailed
                | ErrorKind::ValidationFailed
                | ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ProviderUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::UnknownCapability.to_string(), "UnknownCapability");
        assert_eq!(ErrorKind::RepairExhausted.to_string(), "RepairExhausted");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::ParseFailed.is_retryable());
        assert!(ErrorKind::ValidationFailed.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::UnknownCapability.is_retryable());
        assert!(!ErrorKind::RepairExhausted.is_retryable());
        assert!(!ErrorKind::BudgetExceeded.is_retryable());
    }
}
