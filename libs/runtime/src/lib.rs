//! # dockfleet-runtime
//!
//! The container runtime gateway contract and an in-memory implementation.
//!
//! The gateway abstracts a remote Docker-compatible daemon:
//! - Listing containers filtered by label
//! - Creating, starting, stopping, restarting, and removing containers
//! - Pulling images
//!
//! Every operation may fail with a [`RuntimeError::Processing`] carrying the
//! remote message; callers surface that message verbatim and retry on their
//! own schedule. [`InMemoryRuntime`] is provided for tests and development,
//! with fault injection and a hold gate for observing in-flight states.

mod error;
mod memory;
mod types;

use std::time::Duration;

use async_trait::async_trait;

pub use error::RuntimeError;
pub use memory::{InMemoryRuntime, StoredContainer};
pub use types::{ContainerObservation, ContainerState, CreateContainerRequest};

/// Container runtime gateway.
///
/// Implementations talk to a remote daemon; each call is independently
/// fallible and may observe state changed by external actors.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists containers carrying the given label, in a single consistent
    /// view.
    async fn list_containers(
        &self,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ContainerObservation>, RuntimeError>;

    /// Creates a container and returns its runtime-assigned identifier.
    async fn create_container(
        &self,
        request: &CreateContainerRequest,
    ) -> Result<String, RuntimeError>;

    /// Starts a container by identifier.
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stops a container, allowing it the given grace period to exit.
    ///
    /// Stopping a container that is not running is a no-op.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Restarts a container, allowing it the given grace period to exit.
    async fn restart_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Removes a container.
    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError>;

    /// Pulls an image from its registry.
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;
}
