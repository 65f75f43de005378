//! Container tagging schema.
//!
//! Ownership of a remote container is re-established exclusively by reading
//! these labels back during a sync pass. The same identifiers are exposed to
//! the workload through environment variables so that a build agent can
//! report them on registration.

use std::collections::HashMap;

use crate::{ClientUuid, ImageUuid, InstanceUuid};

/// Label carrying the cloud client UUID.
pub const CLIENT_UUID_LABEL: &str = "dockfleet.client-uuid";

/// Label carrying the owning image UUID.
pub const IMAGE_UUID_LABEL: &str = "dockfleet.image-uuid";

/// Label carrying the instance UUID.
pub const INSTANCE_UUID_LABEL: &str = "dockfleet.instance-uuid";

/// Environment variable carrying the cloud client UUID.
pub const ENV_CLIENT_UUID: &str = "DOCKFLEET_CLOUD_CLIENT_UUID";

/// Environment variable carrying the owning image UUID.
pub const ENV_IMAGE_UUID: &str = "DOCKFLEET_IMAGE_UUID";

/// Environment variable carrying the instance UUID.
pub const ENV_INSTANCE_UUID: &str = "DOCKFLEET_INSTANCE_UUID";

/// Environment variable carrying the build-server callback URL.
pub const ENV_SERVER_URL: &str = "DOCKFLEET_SERVER_URL";

/// The full identity tag set stamped on a container at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerTags {
    pub client: ClientUuid,
    pub image: ImageUuid,
    pub instance: InstanceUuid,
}

impl ContainerTags {
    /// Creates the tag set for a new container.
    pub fn new(client: ClientUuid, image: ImageUuid, instance: InstanceUuid) -> Self {
        Self {
            client,
            image,
            instance,
        }
    }

    /// Renders the tags as container labels.
    pub fn to_labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (CLIENT_UUID_LABEL.to_string(), self.client.to_string()),
            (IMAGE_UUID_LABEL.to_string(), self.image.to_string()),
            (INSTANCE_UUID_LABEL.to_string(), self.instance.to_string()),
        ])
    }

    /// Renders the tags as environment variables.
    pub fn to_env(&self) -> HashMap<String, String> {
        HashMap::from([
            (ENV_CLIENT_UUID.to_string(), self.client.to_string()),
            (ENV_IMAGE_UUID.to_string(), self.image.to_string()),
            (ENV_INSTANCE_UUID.to_string(), self.instance.to_string()),
        ])
    }

    /// Reads a complete, well-formed tag set back from container labels.
    ///
    /// Returns `None` when any of the three identifiers is absent or
    /// malformed. Partial tag sets are never treated as ownership evidence.
    pub fn from_labels(labels: &HashMap<String, String>) -> Option<Self> {
        let client = ClientUuid::parse(labels.get(CLIENT_UUID_LABEL)?).ok()?;
        let image = ImageUuid::parse(labels.get(IMAGE_UUID_LABEL)?).ok()?;
        let instance = InstanceUuid::parse(labels.get(INSTANCE_UUID_LABEL)?).ok()?;
        Some(Self {
            client,
            image,
            instance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> ContainerTags {
        ContainerTags::new(ClientUuid::new(), ImageUuid::new(), InstanceUuid::new())
    }

    #[test]
    fn test_labels_roundtrip() {
        let tags = tags();
        let labels = tags.to_labels();
        assert_eq!(ContainerTags::from_labels(&labels), Some(tags));
    }

    #[test]
    fn test_partial_labels_rejected() {
        let tags = tags();
        let mut labels = tags.to_labels();
        labels.remove(INSTANCE_UUID_LABEL);
        assert_eq!(ContainerTags::from_labels(&labels), None);
    }

    #[test]
    fn test_malformed_label_rejected() {
        let tags = tags();
        let mut labels = tags.to_labels();
        labels.insert(IMAGE_UUID_LABEL.to_string(), "garbage".to_string());
        assert_eq!(ContainerTags::from_labels(&labels), None);
    }

    #[test]
    fn test_env_keys() {
        let env = tags().to_env();
        assert!(env.contains_key(ENV_CLIENT_UUID));
        assert!(env.contains_key(ENV_IMAGE_UUID));
        assert!(env.contains_key(ENV_INSTANCE_UUID));
    }
}
