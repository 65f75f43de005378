//! Cloud client errors and the queryable error descriptor.

use chrono::{DateTime, Utc};
use dockfleet_runtime::RuntimeError;
use thiserror::Error;

use crate::instance::InstanceStatus;

/// Errors reported synchronously to callers of the cloud client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// Starting another instance would exceed the image quota, or starts are
    /// currently blocked by a failed instance or daemon failure.
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// The client has been disposed; no further operations are accepted.
    #[error("cloud client is disposed")]
    Disposed,

    /// The referenced image is not managed by this client.
    #[error("unknown image: {0}")]
    UnknownImage(String),

    /// The requested operation is not valid for the instance's status.
    #[error("cannot {operation} an instance in status {status}")]
    InvalidTransition {
        operation: &'static str,
        status: InstanceStatus,
    },

    /// A gateway call failed synchronously.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A recorded failure, queryable on an instance or on the client itself.
///
/// The client-level descriptor is set exactly when the most recent daemon
/// interaction failed and cleared by the next successful sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Failure message, surfaced verbatim from the source.
    pub message: String,

    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,

    /// True when observed remote state contradicted the expected instance
    /// state (container vanished, stopped, or started by an external actor).
    pub drift: bool,
}

impl ErrorInfo {
    /// Records an ordinary failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            occurred_at: Utc::now(),
            drift: false,
        }
    }

    /// Records a drift failure.
    pub fn drift(message: impl Into<String>) -> Self {
        Self {
            drift: true,
            ..Self::new(message)
        }
    }
}
