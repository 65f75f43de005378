//! Build-agent traits and identity matching.
//!
//! A build agent running inside a container reports the environment it was
//! started with; the client matches those reported identifiers back to a
//! live instance. Agents tagged with this client's UUID but no resolvable
//! instance are stale and eligible for removal during the sync pass, unless
//! marked non-removable by policy.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dockfleet_identity::{
    ClientUuid, ImageUuid, InstanceUuid, ENV_CLIENT_UUID, ENV_IMAGE_UUID, ENV_INSTANCE_UUID,
};

/// A build agent as reported by the orchestrator.
pub trait BuildAgent: Send + Sync {
    /// Current agent display name.
    fn name(&self) -> String;

    /// Renames the agent.
    fn set_name(&self, name: &str);

    /// Looks up one variable of the agent's reported environment.
    fn environment_value(&self, key: &str) -> Option<String>;

    /// False when policy forbids discarding this agent.
    fn is_removable(&self) -> bool;
}

/// Bookkeeping for agents that have unregistered from the build server.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Agents currently unregistered and awaiting cleanup.
    async fn unregistered_agents(&self) -> Vec<Arc<dyn BuildAgent>>;

    /// Discards an agent from the registry.
    async fn discard_agent(&self, agent: &Arc<dyn BuildAgent>);
}

/// Identifiers parsed from an agent's reported environment.
///
/// The client UUID is mandatory; image and instance identifiers are kept
/// only when present and well formed. A malformed identifier is treated the
/// same as an absent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentIdentity {
    pub client: ClientUuid,
    pub image: Option<ImageUuid>,
    pub instance: Option<InstanceUuid>,
}

impl AgentIdentity {
    /// Parses the identity tags out of an agent's environment.
    pub fn from_agent(agent: &dyn BuildAgent) -> Option<Self> {
        let client = agent
            .environment_value(ENV_CLIENT_UUID)
            .and_then(|s| ClientUuid::parse(&s).ok())?;
        let image = agent
            .environment_value(ENV_IMAGE_UUID)
            .and_then(|s| ImageUuid::parse(&s).ok());
        let instance = agent
            .environment_value(ENV_INSTANCE_UUID)
            .and_then(|s| InstanceUuid::parse(&s).ok());

        Some(Self {
            client,
            image,
            instance,
        })
    }
}

/// Static agent description for tests and development.
pub struct StaticBuildAgent {
    name: Mutex<String>,
    env: Mutex<Vec<(String, String)>>,
    removable: bool,
}

impl StaticBuildAgent {
    /// Creates an unnamed, removable agent with an empty environment.
    pub fn new() -> Self {
        Self {
            name: Mutex::new(String::new()),
            env: Mutex::new(Vec::new()),
            removable: true,
        }
    }

    /// Adds an environment variable.
    pub fn environment(self, key: &str, value: &str) -> Self {
        self.env_lock().push((key.to_string(), value.to_string()));
        self
    }

    /// Sets the agent name.
    pub fn named(self, name: &str) -> Self {
        *self.name.lock().unwrap_or_else(|e| e.into_inner()) = name.to_string();
        self
    }

    /// Marks the agent as protected from removal.
    pub fn not_removable(mut self) -> Self {
        self.removable = false;
        self
    }

    fn env_lock(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        self.env.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StaticBuildAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildAgent for StaticBuildAgent {
    fn name(&self) -> String {
        self.name.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.lock().unwrap_or_else(|e| e.into_inner()) = name.to_string();
    }

    fn environment_value(&self, key: &str) -> Option<String> {
        self.env_lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn is_removable(&self) -> bool {
        self.removable
    }
}

/// In-memory [`AgentRegistry`] implementation for tests and development.
pub struct InMemoryAgentRegistry {
    agents: Mutex<Vec<Arc<dyn BuildAgent>>>,
}

impl InMemoryAgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(Vec::new()),
        }
    }

    /// Records an agent as unregistered.
    pub fn unregistered(&self, agent: Arc<dyn BuildAgent>) -> &Self {
        self.lock().push(agent);
        self
    }

    /// Snapshot of the unregistered agents, for assertions.
    pub fn snapshot(&self) -> Vec<Arc<dyn BuildAgent>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn BuildAgent>>> {
        self.agents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryAgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn unregistered_agents(&self) -> Vec<Arc<dyn BuildAgent>> {
        self.snapshot()
    }

    async fn discard_agent(&self, agent: &Arc<dyn BuildAgent>) {
        self.lock().retain(|a| !Arc::ptr_eq(a, agent));
    }
}
