//! The mirror's cache of catalog, tag lists and image info.
//!
//! Every write replaces a whole value for its key, so a reader sees either
//! the previous value or the new one and never a partial list.

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use registry_client::ImageInfo;

type ImageKey = (String, String);

#[derive(Debug, Default)]
pub(crate) struct Store {
    catalog: ArcSwap<Vec<String>>,
    tags: DashMap<String, Arc<[String]>>,
    images: DashMap<ImageKey, ImageInfo>,
    synchronized_at: ArcSwapOption<DateTime<Utc>>,
}

impl Store {
    pub(crate) fn set_catalog(&self, repositories: Vec<String>) {
        self.catalog.store(Arc::new(repositories));
        self.synchronized_at.store(Some(Arc::new(Utc::now())));
    }

    pub(crate) fn catalog(&self) -> Vec<String> {
        self.catalog.load().as_ref().clone()
    }

    pub(crate) fn set_tags(&self, repository: &str, tags: &[String]) {
        self.tags.insert(repository.to_owned(), Arc::from(tags));
    }

    pub(crate) fn tags(&self, repository: &str) -> Option<Vec<String>> {
        self.tags.get(repository).map(|tags| tags.to_vec())
    }

    pub(crate) fn set_image(&self, repository: &str, tag: &str, info: ImageInfo) {
        self.images
            .insert((repository.to_owned(), tag.to_owned()), info);
    }

    pub(crate) fn image(&self, repository: &str, tag: &str) -> Option<ImageInfo> {
        self.images
            .get(&(repository.to_owned(), tag.to_owned()))
            .map(|entry| entry.value().clone())
    }

    pub(crate) fn status(&self) -> MirrorStatus {
        MirrorStatus {
            repositories: self.catalog.load().len(),
            tags: self.tags.iter().map(|entry| entry.value().len()).sum(),
            images: self.images.len(),
            synchronized_at: self.synchronized_at.load_full().map(|at| *at),
        }
    }
}

/// A point-in-time summary of what the mirror holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorStatus {
    /// Repositories in the catalog snapshot.
    pub repositories: usize,

    /// Tags across every stored tag list.
    pub tags: usize,

    /// Stored image info entries.
    pub images: usize,

    /// When the catalog was last listed successfully.
    pub synchronized_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn empty_store() {
        let store = Store::default();
        assert!(store.catalog().is_empty());
        assert!(store.tags("alpha").is_none());
        assert!(store.image("alpha", "v1").is_none());

        let status = store.status();
        assert_eq!(status.repositories, 0);
        assert!(status.synchronized_at.is_none());
    }

    #[test]
    fn writes_replace_whole_values() {
        let store = Store::default();
        store.set_tags("alpha", &tags(&["v1", "v2", "v3"]));
        store.set_tags("alpha", &tags(&["v4"]));
        assert_eq!(store.tags("alpha").unwrap(), tags(&["v4"]));

        store.set_image("alpha", "v4", ImageInfo::new(None, "host/alpha:v4"));
        store.set_image("alpha", "v4", ImageInfo::new(None, "mirror/alpha:v4"));
        assert_eq!(store.image("alpha", "v4").unwrap().reference, "mirror/alpha:v4");
    }

    #[test]
    fn reads_are_copies() {
        let store = Store::default();
        store.set_catalog(tags(&["alpha"]));

        let mut catalog = store.catalog();
        catalog.push("beta".into());
        assert_eq!(store.catalog(), tags(&["alpha"]));
    }

    #[test]
    fn status_counts() {
        let store = Store::default();
        store.set_catalog(tags(&["alpha", "beta"]));
        store.set_tags("alpha", &tags(&["v1", "v2"]));
        store.set_tags("beta", &tags(&["latest"]));
        store.set_image("alpha", "v1", ImageInfo::new(None, "host/alpha:v1"));

        let status = store.status();
        assert_eq!(status.repositories, 2);
        assert_eq!(status.tags, 3);
        assert_eq!(status.images, 1);
        assert!(status.synchronized_at.is_some());
    }
}
