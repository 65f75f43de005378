//! # dockfleet-identity
//!
//! Typed identifiers and the container tagging schema for the dockfleet
//! platform.
//!
//! ## Design Principles
//!
//! - Identities are stable, system-generated UUIDs; display names are
//!   user-controlled labels
//! - All identifiers have a canonical string representation with strict
//!   parsing
//! - Identifiers are typed to prevent mixing client, image, and instance ids
//! - Container ownership is re-established *only* through the tag schema in
//!   [`tags`]; nothing else is treated as evidence of ownership
//!
//! ## Tagging Schema
//!
//! Every container created by a cloud client carries three labels
//! (client, image, and instance UUID) and matching environment variables
//! plus the build-server callback URL. This is the wire-level contract that
//! agents and external tooling depend on.

mod error;
mod macros;
mod tags;
mod types;

pub use error::IdentityError;
pub use tags::{
    ContainerTags, CLIENT_UUID_LABEL, ENV_CLIENT_UUID, ENV_IMAGE_UUID, ENV_INSTANCE_UUID,
    ENV_SERVER_URL, IMAGE_UUID_LABEL, INSTANCE_UUID_LABEL,
};
pub use types::{ClientUuid, ImageUuid, InstanceUuid};

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
