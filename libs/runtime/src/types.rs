//! Container observation and creation types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Runtime state of a container as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
}

impl ContainerState {
    /// Returns true when the container process is live.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Restarting)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// One container as seen in a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObservation {
    /// Runtime-assigned container identifier.
    pub id: String,

    /// Container display name, when assigned.
    pub name: Option<String>,

    /// Image reference the container was created from.
    pub image: String,

    /// Observed runtime state.
    pub state: ContainerState,

    /// Container labels.
    pub labels: HashMap<String, String>,

    /// Network address, when the container is connected.
    pub address: Option<String>,
}

/// Parameters for creating a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainerRequest {
    /// Concrete, pullable image reference.
    pub image: String,

    /// Opaque container template forwarded to the daemon.
    pub template: serde_json::Value,

    /// Requested container name; the daemon assigns one when absent.
    pub name: Option<String>,

    /// Labels to stamp on the container.
    pub labels: HashMap<String, String>,

    /// Environment variables injected into the container.
    pub env: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_running() {
        assert!(ContainerState::Running.is_running());
        assert!(ContainerState::Restarting.is_running());
        assert!(!ContainerState::Created.is_running());
        assert!(!ContainerState::Exited.is_running());
        assert!(!ContainerState::Dead.is_running());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ContainerState::Exited.to_string(), "exited");
        assert_eq!(ContainerState::Running.to_string(), "running");
    }
}
