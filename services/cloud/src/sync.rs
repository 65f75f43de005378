//! The periodic sync pass.
//!
//! Each pass diffs the in-memory fleet model against the containers the
//! daemon actually reports, confirms in-flight transitions, fails drifted
//! instances, re-adopts orphaned containers carrying this client's tags, and
//! garbage-collects instances that were already failed when the pass began.
//!
//! Passes are serialized by the client's fleet lock. The container listing
//! itself happens before the lock is taken so a caller blocked inside a
//! daemon call can never deadlock a pass.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use dockfleet_identity::{ContainerTags, InstanceUuid, CLIENT_UUID_LABEL};
use dockfleet_runtime::{ContainerObservation, RuntimeError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent::AgentIdentity;
use crate::client::{ClientState, CloudClient};
use crate::error::ErrorInfo;
use crate::image::CloudImage;
use crate::instance::{reconcile_status, CloudInstance, InstanceStatus, StatusDecision};

impl CloudClient {
    /// Drives sync passes at the configured interval until shutdown.
    pub(crate) async fn run_sync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state() == ClientState::Disposed {
                        break;
                    }
                    match self.sync_once().await {
                        Ok(()) => {
                            self.last_sync_millis
                                .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
                            *self.error_info.write().await = None;
                        }
                        Err(e) => {
                            warn!(client_uuid = %self.config.client_uuid, error = %e, "Sync pass failed");
                            *self.error_info.write().await = Some(ErrorInfo::new(e.to_string()));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(client_uuid = %self.config.client_uuid, "Sync loop stopped");
    }

    /// Runs one complete sync pass.
    async fn sync_once(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let client_uuid = self.config.client_uuid.to_string();
        let observations = self
            .runtime
            .list_containers(CLIENT_UUID_LABEL, &client_uuid)
            .await?;

        let _guard = self.fleet_lock.lock().await;
        if self.state() == ClientState::Disposed {
            return Ok(());
        }

        // Failed instances are snapshotted first and collected last, so a
        // failure always stays queryable for at least one full pass.
        let mut doomed: Vec<(Arc<CloudImage>, Arc<CloudInstance>)> = Vec::new();
        for image in self.images.values() {
            for instance in image.instances().await {
                if instance.status().await == InstanceStatus::Error {
                    doomed.push((Arc::clone(image), instance));
                }
            }
        }

        // Index the listing by instance tag. Containers carrying this
        // client's label but an incomplete or malformed tag set cannot be
        // tracked and are removed outright.
        let mut observed: HashMap<InstanceUuid, (ContainerTags, ContainerObservation)> =
            HashMap::new();
        for observation in observations {
            match ContainerTags::from_labels(&observation.labels) {
                Some(tags) if tags.client == self.config.client_uuid => {
                    observed.insert(tags.instance, (tags, observation));
                }
                _ => {
                    warn!(
                        container_id = %observation.id,
                        "Removing untrackable container tagged with this client"
                    );
                    self.remove_container_quietly(&observation.id).await?;
                }
            }
        }

        for image in self.images.values() {
            for instance in image.instances().await {
                match observed.remove(&instance.uuid()) {
                    Some((_, observation)) => {
                        self.apply_observation(image, &instance, &observation)
                            .await?;
                    }
                    None => {
                        self.apply_absence(image, &instance).await;
                    }
                }
            }
        }

        // Whatever remains observed belongs to no tracked instance: a
        // leftover from a previous client incarnation. Re-adopt it when the
        // image is still declared, remove it otherwise.
        for (tags, observation) in observed.into_values() {
            match self.images.get(&tags.image) {
                Some(image) => self.adopt_orphan(image, &tags, &observation).await,
                None => {
                    info!(
                        container_id = %observation.id,
                        image_uuid = %tags.image,
                        "Removing orphaned container of an undeclared image"
                    );
                    self.remove_container_quietly(&observation.id).await?;
                }
            }
        }

        for (image, instance) in doomed {
            self.collect_failed_instance(&image, &instance).await?;
        }

        self.sweep_stale_agents().await;

        Ok(())
    }

    /// Diffs one tracked instance against its observed container.
    async fn apply_observation(
        self: &Arc<Self>,
        image: &Arc<CloudImage>,
        instance: &Arc<CloudInstance>,
        observation: &ContainerObservation,
    ) -> Result<(), RuntimeError> {
        instance.observe(observation).await;

        // A terminate raced the initial start; now that the container
        // exists, dispatch the stop it asked for.
        if instance.take_deferred_stop().await {
            debug!(
                instance_uuid = %instance.uuid(),
                container_id = %observation.id,
                "Dispatching deferred stop"
            );
            self.spawn_stop(Arc::clone(image), Arc::clone(instance));
            return Ok(());
        }

        let current = instance.status().await;
        match reconcile_status(current, observation.state.is_running()) {
            StatusDecision::Keep => {
                // A failed removal after a stop leaves a stopped container
                // behind; the image policy is retried until it is gone.
                if current == InstanceStatus::Stopped && image.config().rm_on_exit {
                    self.remove_container_quietly(&observation.id).await?;
                    image.unregister(&instance.uuid()).await;
                }
            }
            StatusDecision::Advance(next) => {
                instance.set_status(next).await;
                if next == InstanceStatus::Stopped && image.config().rm_on_exit {
                    self.remove_container_quietly(&observation.id).await?;
                    image.unregister(&instance.uuid()).await;
                }
            }
            StatusDecision::Drift(reason) => {
                warn!(
                    instance_uuid = %instance.uuid(),
                    container_id = %observation.id,
                    status = %current,
                    reason,
                    "Instance drifted"
                );
                instance.fail_drift(reason).await;
            }
        }
        Ok(())
    }

    /// Handles a tracked instance whose container was not observed.
    async fn apply_absence(&self, image: &Arc<CloudImage>, instance: &Arc<CloudInstance>) {
        if instance.container_id().await.is_none() {
            // Creation still in flight, or it failed and the instance is
            // already in error.
            return;
        }

        let status = instance.status().await;
        match status {
            InstanceStatus::Error => {}
            InstanceStatus::Stopped if image.config().rm_on_exit => {
                // The stop task removed the container; finish the cleanup.
                image.unregister(&instance.uuid()).await;
            }
            _ => {
                warn!(
                    instance_uuid = %instance.uuid(),
                    status = %status,
                    "Backing container vanished"
                );
                instance.fail_drift("container was removed externally").await;
            }
        }
    }

    /// Rebuilds an instance around a fully tagged container left behind by a
    /// previous client incarnation. Adoption ignores the image quota; excess
    /// instances drain through normal terminations.
    async fn adopt_orphan(
        &self,
        image: &Arc<CloudImage>,
        tags: &ContainerTags,
        observation: &ContainerObservation,
    ) {
        let status = if observation.state.is_running() {
            InstanceStatus::Running
        } else {
            InstanceStatus::Stopped
        };

        info!(
            container_id = %observation.id,
            image_uuid = %image.uuid(),
            instance_uuid = %tags.instance,
            status = %status,
            "Adopting orphaned container"
        );

        let instance = Arc::new(CloudInstance::adopted(
            tags.instance,
            image.uuid(),
            observation,
            status,
        ));
        image.register(instance).await;
    }

    /// Collects an instance that was failed before this pass began.
    async fn collect_failed_instance(
        &self,
        image: &Arc<CloudImage>,
        instance: &Arc<CloudInstance>,
    ) -> Result<(), RuntimeError> {
        let error = instance.error_info().await;
        info!(
            instance_uuid = %instance.uuid(),
            error = error.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown"),
            "Garbage-collecting failed instance"
        );

        image.unregister(&instance.uuid()).await;

        if let Some(container_id) = instance.container_id().await {
            // Drifted containers are no longer under this client's control
            // and are always removed; otherwise the image policy decides.
            let drifted = error.map(|e| e.drift).unwrap_or(false);
            if image.config().rm_on_exit || drifted {
                self.remove_container_quietly(&container_id).await?;
            }
        }
        Ok(())
    }

    /// Discards unregistered agents that belong to this client but no longer
    /// map to a live instance.
    async fn sweep_stale_agents(&self) {
        for agent in self.agents.unregistered_agents().await {
            if !agent.is_removable() {
                continue;
            }
            let Some(identity) = AgentIdentity::from_agent(agent.as_ref()) else {
                continue;
            };
            if identity.client != self.config.client_uuid {
                continue;
            }

            let live = match identity.instance {
                Some(uuid) => self.find_instance_by_uuid(&uuid).await.is_some(),
                None => false,
            };
            if !live {
                info!(agent = %agent.name(), "Discarding stale build agent");
                self.agents.discard_agent(&agent).await;
            }
        }
    }

    /// Removes a container, treating an already-gone container as success.
    async fn remove_container_quietly(&self, container_id: &str) -> Result<(), RuntimeError> {
        match self.runtime.remove_container(container_id, true, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
