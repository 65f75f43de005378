//! Gateway errors.

use thiserror::Error;

/// Errors surfaced by the container runtime gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The daemon failed to process the request. Transient; the message is
    /// surfaced verbatim to callers.
    #[error("runtime processing failure: {0}")]
    Processing(String),

    /// The referenced container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested operation is not valid in the current container state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}
