//! Cloud client - the reconciliation engine.
//!
//! The client owns the image/instance graph, answers orchestrator queries,
//! and accepts start/terminate/restart/dispose requests from arbitrary
//! caller tasks. Caller-facing operations update statuses optimistically and
//! queue the actual daemon work as fire-and-forget tasks; results feed back
//! through instance status cells and the periodic sync pass (`sync` module).
//!
//! Structural mutation (quota check plus registration, the sync diff,
//! disposal) is serialized by a single fleet lock per client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use dockfleet_identity::{ClientUuid, ContainerTags, ImageUuid, InstanceUuid, ENV_SERVER_URL};
use dockfleet_runtime::{ContainerRuntime, CreateContainerRequest, RuntimeError};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agent::{AgentIdentity, AgentRegistry, BuildAgent};
use crate::config::{ClientConfig, InstanceUserData};
use crate::error::{CloudError, ErrorInfo};
use crate::image::{CloudImage, ImageConfig};
use crate::instance::{CloudInstance, InstanceStatus};
use crate::resolver::ImageResolver;

/// Client lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initializing,
    Ready,
    Disposed,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initializing,
            1 => Self::Ready,
            _ => Self::Disposed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Ready => 1,
            Self::Disposed => 2,
        }
    }
}

/// The cloud client reconciliation engine.
pub struct CloudClient {
    pub(crate) config: ClientConfig,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    resolver: Arc<dyn ImageResolver>,
    pub(crate) agents: Arc<dyn AgentRegistry>,

    /// Owned images, fixed at construction.
    pub(crate) images: HashMap<ImageUuid, Arc<CloudImage>>,

    /// Serializes quota check-then-act, the sync diff, and disposal.
    pub(crate) fleet_lock: Mutex<()>,

    /// Aggregate error descriptor; set exactly when the most recent daemon
    /// interaction failed.
    pub(crate) error_info: RwLock<Option<ErrorInfo>>,

    /// Millis of the last successful sync pass; -1 until the first one.
    pub(crate) last_sync_millis: AtomicI64,

    lifecycle: AtomicU8,
    shutdown: watch::Sender<bool>,
}

impl CloudClient {
    /// Creates a client for the given image set and starts its sync loop.
    pub fn new(
        config: ClientConfig,
        image_configs: Vec<ImageConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        resolver: Arc<dyn ImageResolver>,
        agents: Arc<dyn AgentRegistry>,
    ) -> Arc<Self> {
        let images: HashMap<ImageUuid, Arc<CloudImage>> = image_configs
            .into_iter()
            .map(|image_config| {
                let image = Arc::new(CloudImage::new(image_config));
                (image.uuid(), image)
            })
            .collect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = Arc::new(Self {
            config,
            runtime,
            resolver,
            agents,
            images,
            fleet_lock: Mutex::new(()),
            error_info: RwLock::new(None),
            last_sync_millis: AtomicI64::new(-1),
            lifecycle: AtomicU8::new(ClientState::Ready.as_u8()),
            shutdown: shutdown_tx,
        });

        info!(
            client_uuid = %client.config.client_uuid,
            image_count = client.images.len(),
            sync_interval_ms = client.config.sync_interval.as_millis() as u64,
            "Cloud client initialized"
        );

        tokio::spawn(Arc::clone(&client).run_sync_loop(shutdown_rx));

        client
    }

    /// This client's UUID; stamped on every container it creates.
    pub fn uuid(&self) -> ClientUuid {
        self.config.client_uuid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    /// True once construction has completed.
    pub fn is_initialized(&self) -> bool {
        self.state() != ClientState::Initializing
    }

    /// Snapshot of the owned images.
    pub fn images(&self) -> Vec<Arc<CloudImage>> {
        self.images.values().cloned().collect()
    }

    /// Looks up an owned image by identifier.
    pub fn find_image_by_uuid(&self, uuid: &ImageUuid) -> Option<Arc<CloudImage>> {
        self.images.get(uuid).cloned()
    }

    /// Looks up a tracked instance by identifier across all images.
    pub async fn find_instance_by_uuid(&self, uuid: &InstanceUuid) -> Option<Arc<CloudInstance>> {
        for image in self.images.values() {
            if let Some(instance) = image.find_instance(uuid).await {
                return Some(instance);
            }
        }
        None
    }

    /// Aggregate error descriptor, when the daemon is unreachable.
    pub async fn error_info(&self) -> Option<ErrorInfo> {
        self.error_info.read().await.clone()
    }

    /// Millis timestamp of the last successful sync pass, or -1.
    pub fn last_sync_millis(&self) -> i64 {
        self.last_sync_millis.load(Ordering::SeqCst)
    }

    /// True when a start request for this image would currently be accepted.
    ///
    /// Advisory only; [`Self::start_new_instance`] re-checks atomically.
    pub async fn can_start_new_instance(&self, image: &Arc<CloudImage>) -> bool {
        self.state() == ClientState::Ready && self.quota_available(image).await
    }

    async fn quota_available(&self, image: &Arc<CloudImage>) -> bool {
        if self.error_info.read().await.is_some() {
            return false;
        }
        // Failed instances block new starts until garbage-collected.
        if image.has_failed_instance().await {
            return false;
        }
        image.non_terminal_count().await < image.config().max_instances
    }

    /// Starts a new instance of the given image.
    ///
    /// Registers the instance immediately and queues the container work; the
    /// returned handle reaches `Running` via subsequent sync passes. When
    /// the image keeps stopped containers (`rm_on_exit` disabled), a stopped
    /// instance is restarted on its existing container instead.
    pub async fn start_new_instance(
        self: &Arc<Self>,
        image: &Arc<CloudImage>,
        user_data: InstanceUserData,
    ) -> Result<Arc<CloudInstance>, CloudError> {
        self.ensure_live()?;
        if !self.images.contains_key(&image.uuid()) {
            return Err(CloudError::UnknownImage(image.uuid().to_string()));
        }

        let guard = self.fleet_lock.lock().await;
        if !self.quota_available(image).await {
            return Err(CloudError::Quota(format!(
                "cannot start a new instance for image {}",
                image.name().await
            )));
        }

        if !image.config().rm_on_exit {
            if let Some(existing) = image.reusable_instance().await {
                existing.set_status(InstanceStatus::ScheduledToStart).await;
                drop(guard);

                info!(
                    client_uuid = %self.config.client_uuid,
                    image_uuid = %image.uuid(),
                    instance_uuid = %existing.uuid(),
                    "Reusing stopped instance"
                );

                let client = Arc::clone(self);
                let instance = Arc::clone(&existing);
                tokio::spawn(async move { client.start_reused(instance).await });
                return Ok(existing);
            }
        }

        let instance = Arc::new(CloudInstance::new(image.uuid()));
        image.register(Arc::clone(&instance)).await;
        instance.set_status(InstanceStatus::ScheduledToStart).await;
        drop(guard);

        info!(
            client_uuid = %self.config.client_uuid,
            image_uuid = %image.uuid(),
            instance_uuid = %instance.uuid(),
            "Starting new instance"
        );

        let client = Arc::clone(self);
        let task_image = Arc::clone(image);
        let task_instance = Arc::clone(&instance);
        tokio::spawn(async move { client.provision(task_image, task_instance, user_data).await });

        Ok(instance)
    }

    /// Requests termination of an instance. Only valid while the instance
    /// is non-terminal.
    ///
    /// Returns once the status has been optimistically updated; the stop
    /// itself completes asynchronously. A terminate racing an in-flight
    /// start is honored by a later sync pass.
    pub async fn terminate_instance(
        self: &Arc<Self>,
        instance: &Arc<CloudInstance>,
    ) -> Result<(), CloudError> {
        self.ensure_live()?;
        let status = instance.status().await;
        if status.is_terminal() {
            return Err(CloudError::InvalidTransition {
                operation: "terminate",
                status,
            });
        }
        let image = self
            .images
            .get(&instance.image_uuid())
            .cloned()
            .ok_or_else(|| CloudError::UnknownImage(instance.image_uuid().to_string()))?;

        instance.set_status(InstanceStatus::ScheduledToStop).await;
        self.spawn_stop(image, Arc::clone(instance));
        Ok(())
    }

    /// Restarts a running instance on its existing container.
    ///
    /// Observed as stopping-then-starting on the same container identifier;
    /// the instance is preserved throughout.
    pub async fn restart_instance(
        self: &Arc<Self>,
        instance: &Arc<CloudInstance>,
    ) -> Result<(), CloudError> {
        self.ensure_live()?;
        let status = instance.status().await;
        if status != InstanceStatus::Running {
            return Err(CloudError::InvalidTransition {
                operation: "restart",
                status,
            });
        }
        let Some(container_id) = instance.container_id().await else {
            return Err(CloudError::InvalidTransition {
                operation: "restart",
                status,
            });
        };

        instance.set_status(InstanceStatus::ScheduledToStop).await;

        let client = Arc::clone(self);
        let instance = Arc::clone(instance);
        tokio::spawn(async move {
            instance.set_status(InstanceStatus::Stopping).await;
            match client
                .runtime
                .restart_container(&container_id, client.config.stop_grace)
                .await
            {
                Ok(()) => instance.set_status(InstanceStatus::Starting).await,
                Err(e) => instance.fail(format!("container restart failed: {e}")).await,
            }
        });
        Ok(())
    }

    /// Disposes the client: stops the sync loop, best-effort terminates and
    /// removes every tracked container, and empties the fleet.
    ///
    /// Never fails; gateway errors during disposal are swallowed.
    pub async fn dispose(&self) {
        let previous = self
            .lifecycle
            .swap(ClientState::Disposed.as_u8(), Ordering::SeqCst);
        if previous == ClientState::Disposed.as_u8() {
            return;
        }

        info!(client_uuid = %self.config.client_uuid, "Disposing cloud client");
        let _ = self.shutdown.send(true);

        let _guard = self.fleet_lock.lock().await;
        for image in self.images.values() {
            for instance in image.clear().await {
                let Some(container_id) = instance.container_id().await else {
                    continue;
                };
                if let Err(e) = self
                    .runtime
                    .stop_container(&container_id, self.config.stop_grace)
                    .await
                {
                    debug!(container_id = %container_id, error = %e, "Ignoring stop failure during disposal");
                }
                if let Err(e) = self.runtime.remove_container(&container_id, true, true).await {
                    debug!(container_id = %container_id, error = %e, "Ignoring remove failure during disposal");
                }
            }
        }
    }

    /// Finds the instance backing a registered build agent, matching the
    /// client, image, and instance identifiers reported in its environment.
    pub async fn find_instance_by_agent(
        &self,
        agent: &dyn BuildAgent,
    ) -> Option<Arc<CloudInstance>> {
        let identity = AgentIdentity::from_agent(agent)?;
        if identity.client != self.config.client_uuid {
            return None;
        }
        let image = self.images.get(&identity.image?)?;
        image.find_instance(&identity.instance?).await
    }

    /// Renames a newly registered agent to incorporate its backing
    /// container's display name, once known. Idempotent.
    pub async fn on_agent_registered(&self, agent: &dyn BuildAgent) {
        let Some(instance) = self.find_instance_by_agent(agent).await else {
            return;
        };
        let Some(container_name) = instance.container_name().await else {
            return;
        };

        let current = agent.name();
        if current.starts_with(&container_name) {
            return;
        }

        let name = format!("{}/{}", container_name, instance.uuid().short());
        info!(
            agent = %current,
            new_name = %name,
            instance_uuid = %instance.uuid(),
            "Renaming registered agent after its backing container"
        );
        agent.set_name(&name);
    }

    // -------------------------------------------------------------------------
    // Asynchronous container work
    // -------------------------------------------------------------------------

    /// Resolves, pulls, creates, and starts the container for a fresh
    /// instance. Failures fail the instance only, never the client.
    async fn provision(
        self: Arc<Self>,
        image: Arc<CloudImage>,
        instance: Arc<CloudInstance>,
        user_data: InstanceUserData,
    ) {
        if self.state() == ClientState::Disposed {
            return;
        }

        let Some(reference) = self.resolver.resolve(&image.config().template).await else {
            warn!(
                image_uuid = %image.uuid(),
                instance_uuid = %instance.uuid(),
                "No image reference could be resolved for this template"
            );
            instance
                .fail("no image reference could be resolved for this template")
                .await;
            return;
        };

        image.set_name(&reference).await;

        if image.config().pull_on_create {
            // Non-fatal: the image may already be present locally, in which
            // case creation below succeeds anyway.
            if let Err(e) = self.runtime.pull_image(&reference).await {
                warn!(
                    image = %reference,
                    instance_uuid = %instance.uuid(),
                    error = %e,
                    "Image pull failed, attempting start from local image"
                );
            }
        }

        instance.set_status(InstanceStatus::Starting).await;

        let tags = ContainerTags::new(self.config.client_uuid, image.uuid(), instance.uuid());
        // The identity tags and callback URL are wire contract; they are
        // applied after the caller metadata and always win.
        let mut env = user_data.env;
        if let Some(url) = user_data
            .server_url
            .or_else(|| self.config.default_server_url.clone())
        {
            env.insert(ENV_SERVER_URL.to_string(), url);
        }
        env.extend(tags.to_env());

        let request = CreateContainerRequest {
            image: reference,
            template: image.config().template.clone(),
            name: None,
            labels: tags.to_labels(),
            env,
        };

        if self.state() == ClientState::Disposed {
            return;
        }

        let container_id = match self.runtime.create_container(&request).await {
            Ok(id) => id,
            Err(e) => {
                instance.fail(format!("container creation failed: {e}")).await;
                return;
            }
        };
        instance.set_container_id(container_id.clone()).await;

        if let Err(e) = self.runtime.start_container(&container_id).await {
            instance.fail(format!("container start failed: {e}")).await;
            return;
        }

        debug!(
            instance_uuid = %instance.uuid(),
            container_id = %container_id,
            "Container started, awaiting sync confirmation"
        );
    }

    /// Starts a reused, previously stopped container.
    async fn start_reused(self: Arc<Self>, instance: Arc<CloudInstance>) {
        let Some(container_id) = instance.container_id().await else {
            instance.fail("reusable container disappeared before start").await;
            return;
        };

        instance.set_status(InstanceStatus::Starting).await;
        if let Err(e) = self.runtime.start_container(&container_id).await {
            instance.fail(format!("container start failed: {e}")).await;
        }
    }

    /// Queues the asynchronous stop for an instance.
    pub(crate) fn spawn_stop(self: &Arc<Self>, image: Arc<CloudImage>, instance: Arc<CloudInstance>) {
        let client = Arc::clone(self);
        tokio::spawn(async move { client.stop(image, instance).await });
    }

    async fn stop(self: Arc<Self>, image: Arc<CloudImage>, instance: Arc<CloudInstance>) {
        let Some(container_id) = instance.container_id().await else {
            // Start still in flight; the sync loop dispatches the stop once
            // the container exists.
            instance.defer_stop().await;
            return;
        };

        instance.set_status(InstanceStatus::Stopping).await;
        match self
            .runtime
            .stop_container(&container_id, self.config.stop_grace)
            .await
        {
            Ok(()) => {
                instance.set_status(InstanceStatus::Stopped).await;
                if image.config().rm_on_exit {
                    // The instance stays registered until its container is
                    // confirmed gone; otherwise the next pass would re-adopt
                    // the survivor as an orphan.
                    match self.runtime.remove_container(&container_id, true, true).await {
                        Ok(()) | Err(RuntimeError::NotFound(_)) => {
                            image.unregister(&instance.uuid()).await;
                        }
                        Err(e) => {
                            warn!(
                                container_id = %container_id,
                                error = %e,
                                "Failed to remove stopped container; the sync loop will retry"
                            );
                        }
                    }
                }
            }
            Err(e) => instance.fail(format!("container stop failed: {e}")).await,
        }
    }

    fn ensure_live(&self) -> Result<(), CloudError> {
        match self.state() {
            ClientState::Disposed => Err(CloudError::Disposed),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InMemoryAgentRegistry;
    use crate::resolver::FixedImageResolver;
    use dockfleet_runtime::InMemoryRuntime;
    use std::time::Duration;

    fn test_client() -> Arc<CloudClient> {
        let mut config = ClientConfig::new(ClientUuid::new());
        config.sync_interval = Duration::from_secs(3600);

        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.known_image("resolved-image", "latest");

        CloudClient::new(
            config,
            vec![ImageConfig {
                profile: "unit".to_string(),
                template: serde_json::json!({"Image": "test-image"}),
                rm_on_exit: true,
                pull_on_create: false,
                max_instances: 1,
            }],
            runtime,
            Arc::new(FixedImageResolver::new("resolved-image:latest")),
            Arc::new(InMemoryAgentRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_initialized_after_construction() {
        let client = test_client();
        assert!(client.is_initialized());
        assert_eq!(client.state(), ClientState::Ready);
        assert_eq!(client.last_sync_millis(), -1);
        client.dispose().await;
    }

    #[tokio::test]
    async fn test_find_image_by_uuid() {
        let client = test_client();
        let image = client.images().pop().unwrap();
        let found = client.find_image_by_uuid(&image.uuid()).unwrap();
        assert_eq!(found.uuid(), image.uuid());
        assert!(client.find_image_by_uuid(&ImageUuid::new()).is_none());
        client.dispose().await;
    }

    #[tokio::test]
    async fn test_disposed_client_fails_fast() {
        let client = test_client();
        let image = client.images().pop().unwrap();
        client.dispose().await;

        assert_eq!(client.state(), ClientState::Disposed);
        assert!(!client.can_start_new_instance(&image).await);
        let err = client
            .start_new_instance(&image, InstanceUserData::default())
            .await
            .unwrap_err();
        assert_eq!(err, CloudError::Disposed);

        // Disposal is idempotent.
        client.dispose().await;
    }

    #[tokio::test]
    async fn test_unknown_image_rejected() {
        let client = test_client();
        let foreign = Arc::new(CloudImage::new(ImageConfig {
            profile: "foreign".to_string(),
            template: serde_json::json!({"Image": "other"}),
            rm_on_exit: true,
            pull_on_create: false,
            max_instances: 1,
        }));

        let err = client
            .start_new_instance(&foreign, InstanceUserData::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::UnknownImage(_)));
        client.dispose().await;
    }
}
