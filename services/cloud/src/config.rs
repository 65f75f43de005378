//! Configuration for the cloud client.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use dockfleet_identity::ClientUuid;

/// Cloud client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Unique identifier for this client; stamped on every container it
    /// creates.
    pub client_uuid: ClientUuid,

    /// Interval between sync passes.
    pub sync_interval: Duration,

    /// Grace period granted to containers when stopping them.
    pub stop_grace: Duration,

    /// Build-server callback URL used when a start request supplies none.
    pub default_server_url: Option<String>,
}

impl ClientConfig {
    /// Creates a configuration with default timings.
    pub fn new(client_uuid: ClientUuid) -> Self {
        Self {
            client_uuid,
            sync_interval: Duration::from_secs(30),
            stop_grace: Duration::from_secs(10),
            default_server_url: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Client UUID can be provided or auto-generated
        let client_uuid = std::env::var("DOCKFLEET_CLIENT_UUID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(ClientUuid::new);

        let sync_interval_secs = std::env::var("DOCKFLEET_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let stop_grace_secs = std::env::var("DOCKFLEET_STOP_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let default_server_url = std::env::var("DOCKFLEET_SERVER_URL").ok();

        Ok(Self {
            client_uuid,
            sync_interval: Duration::from_secs(sync_interval_secs),
            stop_grace: Duration::from_secs(stop_grace_secs),
            default_server_url,
        })
    }
}

/// Caller-supplied data attached to a start request.
#[derive(Debug, Clone, Default)]
pub struct InstanceUserData {
    /// Build-server callback URL for this instance; falls back to
    /// [`ClientConfig::default_server_url`] when absent.
    pub server_url: Option<String>,

    /// Additional environment variables injected into the container.
    pub env: HashMap<String, String>,
}

impl InstanceUserData {
    /// User data carrying only a callback URL.
    pub fn with_server_url(server_url: impl Into<String>) -> Self {
        Self {
            server_url: Some(server_url.into()),
            env: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new(ClientUuid::new());
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert!(config.default_server_url.is_none());
    }

    #[test]
    fn test_user_data_with_server_url() {
        let data = InstanceUserData::with_server_url("https://build.example");
        assert_eq!(data.server_url.as_deref(), Some("https://build.example"));
        assert!(data.env.is_empty());
    }
}
