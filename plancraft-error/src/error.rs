//! The main Error type for plancraft

use crate::{ErrorKind, ErrorStatus};
use std::fmt;

/// The unified error type for all plancraft operations.
///
/// - `kind`: what went wrong
/// - `message`: human-readable description (reused verbatim in repair prompts
///   and escalations, so it must read well on its own)
/// - `status`: whether retrying can help
/// - `operation`: where it happened, e.g. `planner::plan`
/// - `context`: key-value pairs for debugging
/// - `source`: the wrapped underlying error, if any
///
/// # Example
///
/// ```rust
/// use plancraft_error::{Error, ErrorKind};
///
/// let err = Error::unknown_capability("Foo")
///     .with_operation("orchestrator::dispatch")
///     .with_context("turn", "2");
///
/// assert_eq!(err.kind(), ErrorKind::UnknownCapability);
/// assert!(!err.is_retryable());
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: ErrorStatus,
    operation: &'static str,
    context: Vec<(&'static str, String)>,
    source: Option<anyhow::Error>,
}

impl Error {
    /// Create a new error; the status is derived from the kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let status = if kind.is_retryable() {
            ErrorStatus::Temporary
        } else {
            ErrorStatus::Permanent
        };

        Self {
            kind,
            message: message.into(),
            status,
            operation: "",
            context: Vec::new(),
            source: None,
        }
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> ErrorStatus {
        self.status
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn context(&self) -> &[(&'static str, String)] {
        &self.context
    }

    /// Look up the first context value recorded under `key`
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn source_ref(&self) -> Option<&anyhow::Error> {
        self.source.as_ref()
    }

    // =========================================================================
    // Builders (chainable)
    // =========================================================================

    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as temporary (retryable)
    pub fn temporary(mut self) -> Self {
        self.status = ErrorStatus::Temporary;
        self
    }

    /// Mark as permanent (not retryable)
    pub fn permanent(mut self) -> Self {
        self.status = ErrorStatus::Permanent;
        self
    }

    /// Set the operation that caused this error.
    ///
    /// A previously set operation is moved into the context under "called",
    /// so the chain of callers survives propagation.
    pub fn with_operation(mut self, operation: &'static str) -> Self {
        if !self.operation.is_empty() {
            self.context.push(("called", self.operation.to_string()));
        }
        self.operation = operation;
        self
    }

    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set the source error.
    ///
    /// # Panics (debug only)
    /// Panics in debug mode if source was already set.
    pub fn set_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "source error already set");
        self.source = Some(source.into());
        self
    }

    // =========================================================================
    // Status mutations
    // =========================================================================

    /// Mark as persistent after failed retries
    pub fn persist(mut self) -> Self {
        self.status = self.status.persist();
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}

// =============================================================================
// Display - compact, single-line format for logs
// =============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.context.is_empty() {
            write!(f, ", context {{ ")?;
            for (i, (key, value)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", key, value)?;
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

// =============================================================================
// Debug - verbose, multi-line format for debugging
// =============================================================================

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}) at {}", self.kind, self.status, self.operation)?;

        if !self.message.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Message: {}", self.message)?;
        }

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "    Context:")?;
            for (key, value) in &self.context {
                writeln!(f, "        {}: {}", key, value)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "    Source: {:?}", source)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// =============================================================================
// Convenience constructors
// =============================================================================

impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Model output is not extractable/parseable JSON
    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailed, message)
    }

    /// Program violates the turn grammar; `reason` is fed back to the model
    pub fn validation_failed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, reason)
    }

    /// A `@ref` that does not point at an already produced result
    pub fn invalid_reference(index: usize, available: usize) -> Self {
        Self::new(
            ErrorKind::InvalidReference,
            format!(
                "result reference {} is out of range, only {} result(s) available",
                index, available
            ),
        )
        .with_context("ref", index.to_string())
        .with_context("available", available.to_string())
    }

    pub fn unknown_capability(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UnknownCapability, format!("Invalid agent {}", name))
            .with_context("capability", name)
    }

    pub fn delegate_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::DelegateFailed, reason).with_context("delegate", name)
    }

    pub fn repair_exhausted(attempts: usize, last_reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RepairExhausted,
            "Unable to construct a program to answer the question.",
        )
        .with_context("attempts", attempts.to_string())
        .with_context("last_reason", last_reason)
    }

    pub fn budget_exceeded(max_turns: usize) -> Self {
        Self::new(
            ErrorKind::BudgetExceeded,
            format!(
                "Maximum number of turns reached ({}). Please try again later.",
                max_turns
            ),
        )
        .with_context("max_turns", max_turns.to_string())
    }

    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InferenceFailed, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::new(ErrorKind::ValidationFailed, "first step must be WriteThoughts");
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.message(), "first step must be WriteThoughts");
        assert_eq!(err.status(), ErrorStatus::Temporary);
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::inference_failed("timeout")
            .with_operation("planner::complete")
            .with_context("model", "gpt-4o")
            .with_context("attempt", "2");

        assert_eq!(err.operation(), "planner::complete");
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context_value("model"), Some("gpt-4o"));
        assert_eq!(err.context_value("missing"), None);
    }

    #[test]
    fn test_operation_chaining() {
        let err = Error::unknown_capability("Foo")
            .with_operation("orchestrator::dispatch")
            .with_operation("orchestrator::turn");

        assert_eq!(err.operation(), "orchestrator::turn");
        assert_eq!(err.context_value("called"), Some("orchestrator::dispatch"));
    }

    #[test]
    fn test_persist() {
        let err = Error::parse_failed("Response is not JSON");
        assert!(err.is_retryable());

        let err = err.persist();
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ErrorStatus::Persistent);
    }

    #[test]
    fn test_display() {
        let err = Error::repair_exhausted(3, "missing ThinkMore")
            .with_operation("planner::plan")
            .with_context("model", "gpt-4o-mini");

        let display = format!("{}", err);
        assert!(display.contains("RepairExhausted"));
        assert!(display.contains("permanent"));
        assert!(display.contains("planner::plan"));
        assert!(display.contains("attempts: 3"));
        assert!(display.contains("Unable to construct a program"));
    }

    #[test]
    fn test_convenience_constructors() {
        let err = Error::invalid_reference(4, 2);
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        assert!(err.message().contains("4"));

        let err = Error::budget_exceeded(2);
        assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
        assert!(err.message().contains("(2)"));

        let err = Error::delegate_failed("Shipment", "tracking service offline");
        assert_eq!(err.context_value("delegate"), Some("Shipment"));
    }

    #[test]
    fn test_set_source() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = Error::parse_failed("model output is not JSON").set_source(parse_err);

        assert!(err.source_ref().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }
}
