//! VM error helpers
//!
//! Re-exports plancraft-error and provides VM-specific conveniences.

pub use plancraft_error::{Error, ErrorKind, ErrorStatus, Result};

/// Create a ParseFailed error
pub fn parse_error(message: impl Into<String>) -> Error {
    Error::parse_failed(message)
}

/// Create a ParseFailed error pinned to a location in the program document,
/// e.g. `@steps[2].@args[0]`
pub fn parse_error_at(path: &str, message: impl Into<String>) -> Error {
    Error::parse_failed(format!("{}: {}", path, message.into()))
        .with_operation("program::parse")
        .with_context("path", path)
}

/// Create an InvalidReference error raised while evaluating
pub fn invalid_reference(index: usize, available: usize) -> Error {
    Error::invalid_reference(index, available).with_operation("interpreter::evaluate")
}
