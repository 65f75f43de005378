//! Shared harness for cloud client integration tests.
//!
//! Wires a [`CloudClient`] to an [`InMemoryRuntime`] with a short sync
//! interval so that tests can drive real passes and wait on observable
//! conditions instead of poking internals.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use dockfleet_cloud::{
    ClientConfig, CloudClient, CloudImage, CloudInstance, FixedImageResolver, ImageConfig,
    InMemoryAgentRegistry, InstanceStatus, InstanceUserData,
};
use dockfleet_identity::ClientUuid;
use dockfleet_runtime::InMemoryRuntime;

/// Image reference the harness resolver returns and the harness runtime
/// knows about.
pub const RESOLVED_IMAGE: &str = "resolved-image:latest";

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct TestHarness {
    pub client: Arc<CloudClient>,
    pub runtime: Arc<InMemoryRuntime>,
    pub resolver: Arc<FixedImageResolver>,
    pub agents: Arc<InMemoryAgentRegistry>,
}

pub struct HarnessBuilder {
    rm_on_exit: bool,
    pull_on_create: bool,
    max_instances: u32,
    default_server_url: Option<String>,
}

impl HarnessBuilder {
    pub fn rm_on_exit(mut self, on: bool) -> Self {
        self.rm_on_exit = on;
        self
    }

    pub fn pull_on_create(mut self) -> Self {
        self.pull_on_create = true;
        self
    }

    pub fn max_instances(mut self, max: u32) -> Self {
        self.max_instances = max;
        self
    }

    pub fn default_server_url(mut self, url: &str) -> Self {
        self.default_server_url = Some(url.to_string());
        self
    }

    pub fn build(self) -> TestHarness {
        init_tracing();

        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.known_image("resolved-image", "latest");
        let resolver = Arc::new(FixedImageResolver::new(RESOLVED_IMAGE));
        let agents = Arc::new(InMemoryAgentRegistry::new());

        let mut config = ClientConfig::new(ClientUuid::new());
        config.sync_interval = Duration::from_millis(40);
        config.stop_grace = Duration::from_millis(100);
        config.default_server_url = self.default_server_url;

        let image = ImageConfig {
            profile: "integration".to_string(),
            template: serde_json::json!({"Image": "declared-image"}),
            rm_on_exit: self.rm_on_exit,
            pull_on_create: self.pull_on_create,
            max_instances: self.max_instances,
        };

        let runtime_gateway: Arc<dyn dockfleet_runtime::ContainerRuntime> = runtime.clone();
        let image_resolver: Arc<dyn dockfleet_cloud::ImageResolver> = resolver.clone();
        let agent_registry: Arc<dyn dockfleet_cloud::AgentRegistry> = agents.clone();
        let client = CloudClient::new(config, vec![image], runtime_gateway, image_resolver, agent_registry);

        TestHarness {
            client,
            runtime,
            resolver,
            agents,
        }
    }
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            rm_on_exit: true,
            pull_on_create: false,
            max_instances: 1,
            default_server_url: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The single image the harness declares.
    pub fn image(&self) -> Arc<CloudImage> {
        self.client.images().pop().expect("harness image")
    }

    /// Starts an instance with empty user data.
    pub async fn start(&self) -> Arc<CloudInstance> {
        self.client
            .start_new_instance(&self.image(), InstanceUserData::default())
            .await
            .expect("start instance")
    }
}

/// Polls a condition until it holds, panicking after five seconds.
pub async fn wait_until<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Waits for an instance to reach the given status.
pub async fn wait_status(instance: &Arc<CloudInstance>, status: InstanceStatus) {
    wait_until(&format!("instance status {status}"), || {
        let instance = Arc::clone(instance);
        async move { instance.status().await == status }
    })
    .await;
}
