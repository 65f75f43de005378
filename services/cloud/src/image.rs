//! Cloud image - a container template, its policy, and its instances.

use std::collections::HashMap;
use std::sync::Arc;

use dockfleet_identity::{ImageUuid, InstanceUuid};
use tokio::sync::RwLock;

use crate::instance::{CloudInstance, InstanceStatus};

/// Declared configuration for one cloud image.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImageConfig {
    /// Human-readable profile label.
    pub profile: String,

    /// Opaque container template forwarded to the daemon on creation.
    pub template: serde_json::Value,

    /// Remove the container as soon as the instance stops; disables
    /// container reuse.
    pub rm_on_exit: bool,

    /// Pull the resolved image before creating a container from it.
    pub pull_on_create: bool,

    /// Maximum number of concurrently non-terminal instances.
    pub max_instances: u32,
}

/// A container template shared by a set of instances, with a per-template
/// concurrency quota.
pub struct CloudImage {
    uuid: ImageUuid,
    config: ImageConfig,
    /// Display name; rewritten to the resolved image reference after the
    /// first successful resolution.
    name: RwLock<String>,
    instances: RwLock<HashMap<InstanceUuid, Arc<CloudInstance>>>,
}

impl CloudImage {
    /// Creates an image from its declared configuration.
    pub(crate) fn new(config: ImageConfig) -> Self {
        let name = config
            .template
            .get("Image")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&config.profile)
            .to_string();

        Self {
            uuid: ImageUuid::new(),
            config,
            name: RwLock::new(name),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Stable identifier.
    pub fn uuid(&self) -> ImageUuid {
        self.uuid
    }

    /// Declared configuration.
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Current display name.
    pub async fn name(&self) -> String {
        self.name.read().await.clone()
    }

    pub(crate) async fn set_name(&self, name: &str) {
        let mut current = self.name.write().await;
        if *current != name {
            *current = name.to_string();
        }
    }

    /// Snapshot of all tracked instances.
    pub async fn instances(&self) -> Vec<Arc<CloudInstance>> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Looks up a tracked instance by identifier.
    pub async fn find_instance(&self, uuid: &InstanceUuid) -> Option<Arc<CloudInstance>> {
        self.instances.read().await.get(uuid).cloned()
    }

    pub(crate) async fn register(&self, instance: Arc<CloudInstance>) {
        self.instances.write().await.insert(instance.uuid(), instance);
    }

    pub(crate) async fn unregister(&self, uuid: &InstanceUuid) {
        self.instances.write().await.remove(uuid);
    }

    pub(crate) async fn clear(&self) -> Vec<Arc<CloudInstance>> {
        self.instances.write().await.drain().map(|(_, i)| i).collect()
    }

    /// Number of instances currently occupying quota.
    pub async fn non_terminal_count(&self) -> u32 {
        let mut count = 0;
        for instance in self.instances().await {
            if !instance.status().await.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// True when the image holds a failed instance awaiting collection.
    pub(crate) async fn has_failed_instance(&self) -> bool {
        for instance in self.instances().await {
            if instance.status().await == InstanceStatus::Error {
                return true;
            }
        }
        false
    }

    /// Finds a stopped instance whose container survived and can be started
    /// again. Only meaningful when `rm_on_exit` is disabled.
    pub(crate) async fn reusable_instance(&self) -> Option<Arc<CloudInstance>> {
        for instance in self.instances().await {
            if instance.status().await == InstanceStatus::Stopped
                && instance.container_id().await.is_some()
            {
                return Some(instance);
            }
        }
        None
    }
}
