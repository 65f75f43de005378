//! Cloud instance - one container-backed unit of compute.
//!
//! ## State Machine
//!
//! ```text
//! unknown -> scheduled_to_start -> starting -> running
//!                                                |
//!                    scheduled_to_stop <---------+
//!                           |
//!                       stopping -> stopped
//!
//! error is reachable from every non-terminal state
//! ```
//!
//! Transitions are driven by caller requests (start, terminate, restart) and
//! by the sync loop's diff against observed container state. A transition
//! into `Error` records the failure; the instance is garbage-collected on
//! the *next* completed sync pass, so callers always get at least one
//! observation window before it disappears.

use chrono::{DateTime, Utc};
use dockfleet_identity::{ImageUuid, InstanceUuid};
use dockfleet_runtime::ContainerObservation;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ErrorInfo;

/// Lifecycle status of a cloud instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    /// Just created; no remote action taken yet.
    Unknown,
    /// Start request queued.
    ScheduledToStart,
    /// Create/start call in flight, or container observed but not running.
    Starting,
    /// Container confirmed running.
    Running,
    /// Stop request queued.
    ScheduledToStop,
    /// Stop call in flight.
    Stopping,
    /// Container stopped. Terminal success.
    Stopped,
    /// Instance failed. Terminal; garbage-collected on the next sync pass.
    Error,
}

impl InstanceStatus {
    /// Returns true for statuses that no longer occupy quota.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::ScheduledToStart => "scheduled_to_start",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ScheduledToStop => "scheduled_to_stop",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Outcome of diffing an instance status against an observed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDecision {
    /// Observation agrees with the current status, or an operation is in
    /// flight that will settle it.
    Keep,
    /// Advance to the given status.
    Advance(InstanceStatus),
    /// The remote state contradicts the expected one; fail the instance.
    Drift(&'static str),
}

/// Maps an observed container state onto the instance state machine.
///
/// Any remote transition not initiated by this client is treated as an
/// immediate drift error rather than reconciled.
pub fn reconcile_status(current: InstanceStatus, observed_running: bool) -> StatusDecision {
    use InstanceStatus::*;

    if observed_running {
        match current {
            Unknown | ScheduledToStart | Starting => StatusDecision::Advance(Running),
            // Stop or restart in flight; the next pass settles it.
            Running | ScheduledToStop | Stopping | Error => StatusDecision::Keep,
            Stopped => {
                StatusDecision::Drift("container was started externally after being stopped")
            }
        }
    } else {
        match current {
            // Create/start still in flight.
            Unknown | ScheduledToStart | Starting => StatusDecision::Keep,
            Running => StatusDecision::Drift("container was stopped externally"),
            ScheduledToStop | Stopping => StatusDecision::Advance(Stopped),
            Stopped | Error => StatusDecision::Keep,
        }
    }
}

#[derive(Debug)]
struct InstanceCell {
    status: InstanceStatus,
    container_id: Option<String>,
    container_name: Option<String>,
    network_identity: Option<String>,
    error: Option<ErrorInfo>,
    /// A stop was requested before the container existed; the sync loop
    /// dispatches it once the container shows up.
    deferred_stop: bool,
}

/// One desired/running container tracked by the cloud client.
///
/// Handles are shared (`Arc`) between the client, the sync loop, and
/// callers; all mutable state lives behind a single cell so readers never
/// observe a half-updated instance.
#[derive(Debug)]
pub struct CloudInstance {
    uuid: InstanceUuid,
    image_uuid: ImageUuid,
    created_at: DateTime<Utc>,
    cell: RwLock<InstanceCell>,
}

impl CloudInstance {
    /// Creates a fresh instance in `Unknown` status.
    pub(crate) fn new(image_uuid: ImageUuid) -> Self {
        Self::with_uuid(InstanceUuid::new(), image_uuid)
    }

    pub(crate) fn with_uuid(uuid: InstanceUuid, image_uuid: ImageUuid) -> Self {
        Self {
            uuid,
            image_uuid,
            created_at: Utc::now(),
            cell: RwLock::new(InstanceCell {
                status: InstanceStatus::Unknown,
                container_id: None,
                container_name: None,
                network_identity: None,
                error: None,
                deferred_stop: false,
            }),
        }
    }

    /// Reconstructs an instance from an orphaned container observed during a
    /// sync pass (client restart recovery).
    pub(crate) fn adopted(
        uuid: InstanceUuid,
        image_uuid: ImageUuid,
        observation: &ContainerObservation,
        status: InstanceStatus,
    ) -> Self {
        Self {
            uuid,
            image_uuid,
            created_at: Utc::now(),
            cell: RwLock::new(InstanceCell {
                status,
                container_id: Some(observation.id.clone()),
                container_name: observation.name.clone(),
                network_identity: observation.address.clone(),
                error: None,
                deferred_stop: false,
            }),
        }
    }

    /// Stable identifier, globally unique within the client.
    pub fn uuid(&self) -> InstanceUuid {
        self.uuid
    }

    /// UUID of the owning image.
    pub fn image_uuid(&self) -> ImageUuid {
        self.image_uuid
    }

    /// When the instance was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> InstanceStatus {
        self.cell.read().await.status
    }

    /// Runtime-assigned container identifier, once creation succeeded.
    pub async fn container_id(&self) -> Option<String> {
        self.cell.read().await.container_id.clone()
    }

    /// Container display name, once observed.
    pub async fn container_name(&self) -> Option<String> {
        self.cell.read().await.container_name.clone()
    }

    /// Container network address, once observed.
    pub async fn network_identity(&self) -> Option<String> {
        self.cell.read().await.network_identity.clone()
    }

    /// Failure descriptor, when the instance is in `Error`.
    pub async fn error_info(&self) -> Option<ErrorInfo> {
        self.cell.read().await.error.clone()
    }

    pub(crate) async fn set_status(&self, status: InstanceStatus) {
        let mut cell = self.cell.write().await;
        if cell.status != status {
            debug!(
                instance_uuid = %self.uuid,
                from = %cell.status,
                to = %status,
                "Instance status transition"
            );
            cell.status = status;
        }
    }

    pub(crate) async fn set_container_id(&self, id: String) {
        self.cell.write().await.container_id = Some(id);
    }

    /// Copies observed container metadata onto the instance.
    pub(crate) async fn observe(&self, observation: &ContainerObservation) {
        let mut cell = self.cell.write().await;
        if observation.name.is_some() {
            cell.container_name = observation.name.clone();
        }
        cell.network_identity = observation.address.clone();
    }

    /// Fails the instance with an ordinary error.
    pub(crate) async fn fail(&self, message: impl Into<String>) {
        self.fail_with(ErrorInfo::new(message)).await;
    }

    /// Fails the instance with a drift error.
    pub(crate) async fn fail_drift(&self, message: impl Into<String>) {
        self.fail_with(ErrorInfo::drift(message)).await;
    }

    async fn fail_with(&self, error: ErrorInfo) {
        let mut cell = self.cell.write().await;
        debug!(
            instance_uuid = %self.uuid,
            from = %cell.status,
            error = %error.message,
            "Instance failed"
        );
        cell.status = InstanceStatus::Error;
        cell.error = Some(error);
    }

    pub(crate) async fn defer_stop(&self) {
        self.cell.write().await.deferred_stop = true;
    }

    /// Clears and returns the deferred-stop marker.
    pub(crate) async fn take_deferred_stop(&self) -> bool {
        let mut cell = self.cell.write().await;
        std::mem::take(&mut cell.deferred_stop)
    }
}
