use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{RegistryError, RegistryResult};
use crate::reference::pull_reference;
use crate::{ImageInfo, Registry};

/// A registry held entirely in memory.
///
/// Repositories are listed in the order they were first inserted, and tags
/// in the order they were added to their repository.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    hostname: String,
    inner: RwLock<Contents>,
}

#[derive(Debug, Default)]
struct Contents {
    repositories: Vec<String>,
    tags: HashMap<String, Vec<String>>,
    images: HashMap<(String, String), ImageInfo>,
}

impl MemoryRegistry {
    /// An empty registry, whose pull references use `localhost`.
    pub fn new() -> Self {
        Self::with_hostname("localhost")
    }

    /// An empty registry whose pull references use `hostname`.
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            inner: RwLock::default(),
        }
    }

    /// Add a repository with no tags. Existing repositories are left as-is.
    pub fn insert_repository(&self, repository: &str) {
        let mut contents = self.inner.write();
        if !contents.tags.contains_key(repository) {
            contents.repositories.push(repository.to_owned());
            contents.tags.insert(repository.to_owned(), Vec::new());
        }
    }

    /// Add (or replace) an image, creating its repository and tag as needed.
    pub fn insert(&self, repository: &str, tag: &str, created: Option<DateTime<Utc>>) {
        self.insert_tag(repository, tag);

        let info = ImageInfo::new(created, pull_reference(&self.hostname, repository, tag));
        self.inner
            .write()
            .images
            .insert((repository.to_owned(), tag.to_owned()), info);
    }

    /// List a tag without any image behind it, so that [`Registry::image_info`]
    /// reports it as not found.
    pub fn insert_tag(&self, repository: &str, tag: &str) {
        self.insert_repository(repository);

        let mut contents = self.inner.write();
        let tags = contents.tags.entry(repository.to_owned()).or_default();
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_owned());
        }
    }

    /// Builder form of [`MemoryRegistry::insert`].
    pub fn with_image(self, repository: &str, tag: &str, created: Option<DateTime<Utc>>) -> Self {
        self.insert(repository, tag, created);
        self
    }

    /// Remove a repository along with its tags and images.
    pub fn remove_repository(&self, repository: &str) {
        let mut contents = self.inner.write();
        contents.repositories.retain(|r| r != repository);
        contents.tags.remove(repository);
        contents.images.retain(|(r, _), _| r != repository);
    }

    /// Remove one tag and its image.
    pub fn remove_tag(&self, repository: &str, tag: &str) {
        let mut contents = self.inner.write();
        if let Some(tags) = contents.tags.get_mut(repository) {
            tags.retain(|t| t != tag);
        }
        contents
            .images
            .remove(&(repository.to_owned(), tag.to_owned()));
    }
}

#[async_trait::async_trait]
impl Registry for MemoryRegistry {
    async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        Ok(self.inner.read().repositories.clone())
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        self.inner
            .read()
            .tags
            .get(repository)
            .cloned()
            .ok_or_else(|| RegistryError::repository_not_found(repository))
    }

    async fn image_info(&self, repository: &str, tag: &str) -> RegistryResult<ImageInfo> {
        self.inner
            .read()
            .images
            .get(&(repository.to_owned(), tag.to_owned()))
            .cloned()
            .ok_or_else(|| RegistryError::tag_not_found(repository, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[tokio::test]
    async fn insertion_order_is_kept() {
        let registry = MemoryRegistry::with_hostname("registry.test")
            .with_image("zeta", "v1", None)
            .with_image("alpha", "v2", None)
            .with_image("alpha", "v1", None);

        assert_eq!(
            registry.list_repositories().await.unwrap(),
            vec!["zeta", "alpha"]
        );
        assert_eq!(registry.list_tags("alpha").await.unwrap(), vec!["v2", "v1"]);
    }

    #[tokio::test]
    async fn image_info_and_misses() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let registry = MemoryRegistry::with_hostname("registry.test").with_image(
            "team/app",
            "latest",
            Some(created),
        );

        let info = registry.image_info("team/app", "latest").await.unwrap();
        assert_eq!(info.created, Some(created));
        assert_eq!(info.reference, "registry.test/team/app:latest");

        assert!(registry
            .image_info("team/app", "missing")
            .await
            .unwrap_err()
            .is_not_found());
        assert!(registry.list_tags("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn removal() {
        let registry = MemoryRegistry::new()
            .with_image("alpha", "v1", None)
            .with_image("alpha", "v2", None)
            .with_image("beta", "v1", None);

        registry.remove_tag("alpha", "v1");
        assert_eq!(registry.list_tags("alpha").await.unwrap(), vec!["v2"]);
        assert!(registry.image_info("alpha", "v1").await.is_err());

        registry.insert_tag("alpha", "dangling");
        assert_eq!(registry.list_tags("alpha").await.unwrap(), vec!["v2", "dangling"]);
        assert!(registry
            .image_info("alpha", "dangling")
            .await
            .unwrap_err()
            .is_not_found());

        registry.remove_repository("beta");
        assert_eq!(registry.list_repositories().await.unwrap(), vec!["alpha"]);
        assert!(registry.list_tags("beta").await.is_err());
    }
}
