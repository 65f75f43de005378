//! Image-reference resolution seam.
//!
//! A template declares what to run; the resolver maps it to a concrete,
//! pullable image reference. Resolution happens once per start request and
//! may legitimately come up empty, in which case the requesting instance
//! fails without touching the daemon.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

/// Maps a container template to a concrete image reference.
#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolves the template, or returns `None` when no image can be
    /// determined.
    async fn resolve(&self, template: &serde_json::Value) -> Option<String>;
}

/// Resolver that reads the image reference straight from the template's
/// `Image` field.
pub struct TemplateImageResolver;

#[async_trait]
impl ImageResolver for TemplateImageResolver {
    async fn resolve(&self, template: &serde_json::Value) -> Option<String> {
        template
            .get("Image")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    }
}

/// Resolver returning a fixed, settable image reference. For tests and
/// development.
pub struct FixedImageResolver {
    image: Mutex<Option<String>>,
}

impl FixedImageResolver {
    /// Creates a resolver that always returns the given reference.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: Mutex::new(Some(image.into())),
        }
    }

    /// Creates a resolver that never resolves.
    pub fn unresolved() -> Self {
        Self {
            image: Mutex::new(None),
        }
    }

    /// Replaces the resolved reference.
    pub fn set(&self, image: Option<&str>) {
        *self.lock() = image.map(str::to_string);
    }

    fn lock(&self) -> MutexGuard<'_, Option<String>> {
        self.image.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ImageResolver for FixedImageResolver {
    async fn resolve(&self, _template: &serde_json::Value) -> Option<String> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_resolver() {
        let template = serde_json::json!({"Image": "app:1.0"});
        let resolved = TemplateImageResolver.resolve(&template).await;
        assert_eq!(resolved.as_deref(), Some("app:1.0"));

        let empty = serde_json::json!({});
        assert_eq!(TemplateImageResolver.resolve(&empty).await, None);
    }

    #[tokio::test]
    async fn test_fixed_resolver() {
        let resolver = FixedImageResolver::new("resolved:latest");
        let template = serde_json::json!({"Image": "declared"});
        assert_eq!(
            resolver.resolve(&template).await.as_deref(),
            Some("resolved:latest")
        );

        resolver.set(None);
        assert_eq!(resolver.resolve(&template).await, None);
    }

    #[tokio::test]
    async fn test_unresolved() {
        let resolver = FixedImageResolver::unresolved();
        assert_eq!(resolver.resolve(&serde_json::json!({})).await, None);
    }
}
