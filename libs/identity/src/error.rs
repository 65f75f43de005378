//! Identifier parsing errors.

use thiserror::Error;

/// Errors produced when parsing identifiers from their string form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The input string was empty.
    #[error("empty identifier")]
    Empty,

    /// The input was not a valid UUID.
    #[error("malformed identifier: {0}")]
    Malformed(String),
}
