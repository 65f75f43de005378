//! In-memory container runtime for tests and development.
//!
//! Behaves like a small Docker daemon: containers move through the usual
//! states, images must be known before containers can be created from them,
//! and external actors (tests) can mutate container state directly to
//! simulate drift. Two fault hooks are provided:
//!
//! - [`InMemoryRuntime::set_fail_on_access`] makes every call fail with a
//!   processing error until cleared, simulating an unreachable daemon.
//! - [`InMemoryRuntime::hold`] blocks all calls until the returned guard is
//!   dropped, letting tests observe optimistic in-flight statuses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::{
    ContainerObservation, ContainerRuntime, ContainerState, CreateContainerRequest, RuntimeError,
};

/// One container held by the in-memory daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContainer {
    pub id: String,
    pub name: Option<String>,
    pub image: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub address: Option<String>,
}

impl StoredContainer {
    /// Creates a container in the given state with a fresh identifier.
    pub fn new(state: ContainerState) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            name: Some(format!("dockfleet-{}", &id[..12])),
            id,
            image: "unknown".to_string(),
            state,
            labels: HashMap::new(),
            env: HashMap::new(),
            address: None,
        }
    }

    /// Adds a label.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets the source image reference.
    pub fn image(mut self, image: &str) -> Self {
        self.image = image.to_string();
        self
    }

    fn observe(&self) -> ContainerObservation {
        ContainerObservation {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            state: self.state,
            labels: self.labels.clone(),
            address: self.address.clone(),
        }
    }
}

#[derive(Debug)]
struct KnownImage {
    /// Present only locally; pulls for it fail.
    local_only: bool,
}

#[derive(Debug, Default)]
struct DaemonState {
    containers: HashMap<String, StoredContainer>,
    images: HashMap<String, KnownImage>,
}

/// In-memory [`ContainerRuntime`] implementation.
pub struct InMemoryRuntime {
    state: Mutex<DaemonState>,
    gate: Arc<RwLock<()>>,
    fail_on_access: Mutex<Option<String>>,
    address_counter: AtomicU32,
}

impl InMemoryRuntime {
    /// Creates an empty runtime with no known images.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DaemonState::default()),
            gate: Arc::new(RwLock::new(())),
            fail_on_access: Mutex::new(None),
            address_counter: AtomicU32::new(2),
        }
    }

    /// Registers an image available both locally and in the registry.
    pub fn known_image(&self, name: &str, tag: &str) -> &Self {
        self.state()
            .images
            .insert(format!("{name}:{tag}"), KnownImage { local_only: false });
        self
    }

    /// Registers an image available locally only; pulls for it fail.
    pub fn known_image_local_only(&self, name: &str, tag: &str) -> &Self {
        self.state()
            .images
            .insert(format!("{name}:{tag}"), KnownImage { local_only: true });
        self
    }

    /// Injects a container as if created by an external actor.
    pub fn inject(&self, container: StoredContainer) {
        self.state()
            .containers
            .insert(container.id.clone(), container);
    }

    /// Returns a snapshot of all containers, unfiltered.
    pub fn snapshot(&self) -> Vec<StoredContainer> {
        self.state().containers.values().cloned().collect()
    }

    /// Returns a single container by identifier.
    pub fn container(&self, id: &str) -> Option<StoredContainer> {
        self.state().containers.get(id).cloned()
    }

    /// Makes every subsequent call fail with the given message, or restores
    /// normal operation when `None`.
    pub fn set_fail_on_access(&self, message: Option<&str>) {
        *self
            .fail_on_access
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = message.map(str::to_string);
    }

    /// Blocks all runtime calls until the returned guard is dropped.
    pub async fn hold(&self) -> OwnedRwLockWriteGuard<()> {
        self.gate.clone().write_owned().await
    }

    fn state(&self) -> MutexGuard<'_, DaemonState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn check_access(&self) -> Result<(), RuntimeError> {
        // Wait for any hold to be released before looking at anything.
        drop(self.gate.read().await);

        let failure = self
            .fail_on_access
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match failure {
            Some(message) => Err(RuntimeError::Processing(message)),
            None => Ok(()),
        }
    }

    fn next_address(&self) -> String {
        let n = self.address_counter.fetch_add(1, Ordering::SeqCst);
        format!("172.17.0.{}", 2 + n % 250)
    }

    fn image_key(image: &str) -> String {
        if image.rsplit('/').next().is_some_and(|last| last.contains(':')) {
            image.to_string()
        } else {
            format!("{image}:latest")
        }
    }
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn list_containers(
        &self,
        label_key: &str,
        label_value: &str,
    ) -> Result<Vec<ContainerObservation>, RuntimeError> {
        self.check_access().await?;
        Ok(self
            .state()
            .containers
            .values()
            .filter(|c| c.labels.get(label_key).map(String::as_str) == Some(label_value))
            .map(StoredContainer::observe)
            .collect())
    }

    async fn create_container(
        &self,
        request: &CreateContainerRequest,
    ) -> Result<String, RuntimeError> {
        self.check_access().await?;

        let mut state = self.state();
        let key = Self::image_key(&request.image);
        if !state.images.contains_key(&key) {
            return Err(RuntimeError::NotFound(format!("no such image: {key}")));
        }

        let id = Uuid::new_v4().simple().to_string();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("dockfleet-{}", &id[..12]));

        debug!(container_id = %id, image = %request.image, "creating container");

        state.containers.insert(
            id.clone(),
            StoredContainer {
                id: id.clone(),
                name: Some(name),
                image: request.image.clone(),
                state: ContainerState::Created,
                labels: request.labels.clone(),
                env: request.env.clone(),
                address: None,
            },
        );

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.check_access().await?;
        let address = self.next_address();
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;

        container.state = ContainerState::Running;
        container.address = Some(address);
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.check_access().await?;
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;

        if container.state.is_running() {
            container.state = ContainerState::Exited;
            container.address = None;
        }
        Ok(())
    }

    async fn restart_container(&self, id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.check_access().await?;
        let address = self.next_address();
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;

        container.state = ContainerState::Running;
        container.address = Some(address);
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        force: bool,
        _remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        self.check_access().await?;
        let mut state = self.state();
        let Some(container) = state.containers.get(id) else {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        };

        if container.state.is_running() && !force {
            return Err(RuntimeError::InvalidState(format!(
                "container is running: {id}"
            )));
        }

        state.containers.remove(id);
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.check_access().await?;
        let key = Self::image_key(image);
        let state = self.state();
        match state.images.get(&key) {
            Some(known) if !known.local_only => Ok(()),
            _ => Err(RuntimeError::Processing(format!(
                "pull failed: image not found in registry: {key}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(image: &str) -> CreateContainerRequest {
        CreateContainerRequest {
            image: image.to_string(),
            template: serde_json::json!({"Image": image}),
            name: None,
            labels: HashMap::from([("owner".to_string(), "t".to_string())]),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_requires_known_image() {
        let rt = InMemoryRuntime::new();
        let err = rt.create_container(&request("ghost:1.0")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));

        rt.known_image("ghost", "1.0");
        let id = rt.create_container(&request("ghost:1.0")).await.unwrap();
        assert_eq!(rt.container(&id).unwrap().state, ContainerState::Created);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let rt = InMemoryRuntime::new();
        rt.known_image("app", "latest");
        let id = rt.create_container(&request("app:latest")).await.unwrap();

        rt.start_container(&id).await.unwrap();
        let running = rt.container(&id).unwrap();
        assert_eq!(running.state, ContainerState::Running);
        assert!(running.address.is_some());

        rt.stop_container(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(rt.container(&id).unwrap().state, ContainerState::Exited);

        // Stopping an exited container is a no-op.
        rt.stop_container(&id, Duration::from_secs(1)).await.unwrap();

        rt.remove_container(&id, false, true).await.unwrap();
        assert!(rt.container(&id).is_none());
    }

    #[tokio::test]
    async fn test_remove_running_requires_force() {
        let rt = InMemoryRuntime::new();
        rt.known_image("app", "latest");
        let id = rt.create_container(&request("app:latest")).await.unwrap();
        rt.start_container(&id).await.unwrap();

        let err = rt.remove_container(&id, false, false).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));

        rt.remove_container(&id, true, true).await.unwrap();
        assert!(rt.container(&id).is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_label() {
        let rt = InMemoryRuntime::new();
        rt.inject(StoredContainer::new(ContainerState::Created).label("fleet", "a"));
        rt.inject(StoredContainer::new(ContainerState::Created).label("fleet", "b"));
        rt.inject(StoredContainer::new(ContainerState::Created));

        let listed = rt.list_containers("fleet", "a").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].labels.get("fleet").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_pull_local_only_fails() {
        let rt = InMemoryRuntime::new();
        rt.known_image_local_only("cached", "1.0");

        let err = rt.pull_image("cached:1.0").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Processing(_)));

        // Creation still works from the local copy.
        let id = rt.create_container(&request("cached:1.0")).await.unwrap();
        assert!(rt.container(&id).is_some());
    }

    #[tokio::test]
    async fn test_fail_on_access() {
        let rt = InMemoryRuntime::new();
        rt.set_fail_on_access(Some("daemon unreachable"));

        let err = rt.list_containers("k", "v").await.unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Processing("daemon unreachable".to_string())
        );

        rt.set_fail_on_access(None);
        assert!(rt.list_containers("k", "v").await.is_ok());
    }

    #[tokio::test]
    async fn test_hold_blocks_calls() {
        let rt = Arc::new(InMemoryRuntime::new());
        let guard = rt.hold().await;

        let rt2 = Arc::clone(&rt);
        let task = tokio::spawn(async move { rt2.list_containers("k", "v").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        drop(guard);
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_image_key_defaults_tag() {
        assert_eq!(InMemoryRuntime::image_key("app"), "app:latest");
        assert_eq!(InMemoryRuntime::image_key("app:1.0"), "app:1.0");
        assert_eq!(
            InMemoryRuntime::image_key("registry:5000/app"),
            "registry:5000/app:latest"
        );
    }
}
