//! dockfleet Cloud Client Library
//!
//! The cloud client owns a fleet of container-backed build agents. It keeps
//! a declared set of cloud images (container templates) and their live
//! instances converged with the actual state of a remote Docker-compatible
//! daemon, and presents the result as an instantaneous, consistent in-memory
//! fleet model to the build-server orchestrator.
//!
//! ## Architecture
//!
//! ```text
//! CloudClient
//! ├── CloudImage(uuid)       (template + policy + quota, owns instances)
//! │   └── CloudInstance(uuid)  (per-container lifecycle state machine)
//! ├── sync loop              (periodic diff of desired vs. observed state)
//! └── agent matcher          (identity lookup for registered build agents)
//! ```
//!
//! Container ownership is carried entirely by the label schema in
//! `dockfleet-identity`; the sync loop re-adopts orphaned containers after a
//! client restart by reading those labels back.
//!
//! ## Modules
//!
//! - `client`: the reconciliation engine and caller-facing operations
//! - `sync`: the periodic sync pass (diff, orphan handling, garbage
//!   collection, stale-agent sweep)
//! - `image` / `instance`: fleet model entities and their state machines
//! - `agent`: build-agent traits and the identity matcher types
//! - `resolver`: image-reference resolution seam

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod image;
pub mod instance;
pub mod resolver;

mod sync;

// Re-export commonly used types
pub use agent::{AgentIdentity, AgentRegistry, BuildAgent, InMemoryAgentRegistry, StaticBuildAgent};
pub use client::{ClientState, CloudClient};
pub use config::{ClientConfig, InstanceUserData};
pub use error::{CloudError, ErrorInfo};
pub use image::{CloudImage, ImageConfig};
pub use instance::{CloudInstance, InstanceStatus};
pub use resolver::{FixedImageResolver, ImageResolver, TemplateImageResolver};
