//! # plancraft-error
//!
//! Unified error handling for plancraft, following OpenDAL's error handling practices.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g. ValidationFailed, UnknownCapability)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use plancraft_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ValidationFailed, "program must end with ThinkMore")
//!         .with_operation("validator::validate")
//!         .with_context("turn", "1"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, plancraft_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - No blanket `From<OtherError>` impls, so raw errors never leak

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using plancraft Error
pub type Result<T> = std::result::Result<T, Error>;
