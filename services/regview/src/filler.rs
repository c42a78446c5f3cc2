//! View models for the HTML pages, built from any [`Registry`].

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use mirror::Mirror;
use registry_client::reference::validate_repository;
use registry_client::{Registry, RegistryResult};

/// Fields every page needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseData {
    /// URL path prefix for links, always ending in `/`.
    pub absolute_dir: String,

    /// Registry hostname, shown in headings and pull references.
    pub registry_name: String,

    /// When the page was rendered, RFC 3339.
    pub last_updated: String,

    /// When the mirror last listed the catalog, if pages come from a mirror.
    pub synchronized_at: Option<DateTime<Utc>>,
}

/// One tag of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagData {
    /// Repository name.
    pub name: String,

    /// Tag name.
    pub tag: String,

    /// Reference to pull this tag by.
    pub pull_reference: String,

    /// When the image was created, if known.
    pub created_at: Option<DateTime<Utc>>,
}

/// A repository and its tags, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryData {
    /// Shared page fields.
    pub base: BaseData,

    /// Repository name.
    pub repository_name: String,

    /// Pull reference of the newest tag.
    pub pull_reference: String,

    /// Tags, newest first, with unknown creation times last.
    pub tags: Vec<TagData>,

    /// Creation time of the newest tag.
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Every repository with data, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexData {
    /// Shared page fields.
    pub base: BaseData,

    /// Repositories sorted by name.
    pub repositories: Vec<RepositoryData>,
}

/// Builds page data from a registry.
#[derive(Debug, Clone)]
pub struct Filler {
    registry: Arc<dyn Registry>,
    registry_name: String,
    absolute_dir: String,
    mirror: Option<Mirror>,
}

impl Filler {
    /// A filler reading from `registry`. Links are prefixed with `absolute_dir`.
    pub fn new(registry: Arc<dyn Registry>, registry_name: impl Into<String>, absolute_dir: &str) -> Self {
        Self {
            registry,
            registry_name: registry_name.into(),
            absolute_dir: normalize_absolute_dir(absolute_dir),
            mirror: None,
        }
    }

    /// A filler reading from `mirror`, whose last synchronization shows in page footers.
    pub fn from_mirror(mirror: Mirror, registry_name: impl Into<String>, absolute_dir: &str) -> Self {
        let mut filler = Self::new(Arc::new(mirror.clone()), registry_name, absolute_dir);
        filler.mirror = Some(mirror);
        filler
    }

    /// The registry pages are filled from.
    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Fields shared by every page, stamped with the current time.
    pub fn base_data(&self) -> BaseData {
        BaseData {
            absolute_dir: self.absolute_dir.clone(),
            registry_name: self.registry_name.clone(),
            last_updated: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            synchronized_at: self
                .mirror
                .as_ref()
                .and_then(|mirror| mirror.status().synchronized_at),
        }
    }

    /// Data for one tag.
    pub async fn tag_data(&self, repository: &str, tag: &str) -> RegistryResult<TagData> {
        let info = self.registry.image_info(repository, tag).await?;
        Ok(TagData {
            name: repository.to_owned(),
            tag: tag.to_owned(),
            pull_reference: info.reference,
            created_at: info.created,
        })
    }

    /// Data for one repository, or `None` if it has no tags with data.
    ///
    /// Invalid names are an error; a repository the registry does not know
    /// about is `None`.
    #[tracing::instrument(skip(self))]
    pub async fn repository_data(&self, repository: &str) -> RegistryResult<Option<RepositoryData>> {
        validate_repository(repository)?;

        let names = match self.registry.list_tags(repository).await {
            Ok(names) => names,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };

        let mut tags = Vec::with_capacity(names.len());
        for tag in &names {
            match self.tag_data(repository, tag).await {
                Ok(data) => tags.push(data),
                Err(error) => tracing::warn!(%tag, %error, "skipping tag"),
            }
        }

        // Option orders None first, so a descending sort leaves unknown times last.
        tags.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let Some(newest) = tags.first() else {
            return Ok(None);
        };

        Ok(Some(RepositoryData {
            base: self.base_data(),
            repository_name: repository.to_owned(),
            pull_reference: newest.pull_reference.clone(),
            last_updated_at: newest.created_at,
            tags,
        }))
    }

    /// Data for the index page.
    ///
    /// Fails only if the repository list can't be had. Repositories that
    /// error or have no data are left out.
    #[tracing::instrument(skip(self))]
    pub async fn index_data(&self) -> RegistryResult<IndexData> {
        let mut repositories = Vec::new();
        for repository in self.registry.list_repositories().await? {
            match self.repository_data(&repository).await {
                Ok(Some(data)) => repositories.push(data),
                Ok(None) => tracing::debug!(%repository, "no data for repository"),
                Err(error) => tracing::warn!(%repository, %error, "skipping repository"),
            }
        }
        Ok(self.index_from(repositories))
    }

    /// Index data from repositories which have already been filled.
    pub fn index_from(&self, mut repositories: Vec<RepositoryData>) -> IndexData {
        repositories.sort_by(|a, b| a.repository_name.cmp(&b.repository_name));
        IndexData {
            base: self.base_data(),
            repositories,
        }
    }
}

/// Clean up a URL path prefix and make sure it ends in `/`.
///
/// Repeated slashes and `.` segments are dropped and `..` segments are
/// resolved. An empty prefix becomes `./`.
pub fn normalize_absolute_dir(dir: &str) -> String {
    let rooted = dir.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in dir.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            segment => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, true) => "/".to_owned(),
        (true, false) => format!("/{joined}/"),
        (false, true) => "./".to_owned(),
        (false, false) => format!("{joined}/"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;
    use registry_client::MemoryRegistry;

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap())
    }

    fn filler(registry: MemoryRegistry) -> Filler {
        Filler::new(Arc::new(registry), "registry.test", "/")
    }

    #[test]
    fn absolute_dirs() {
        assert_eq!(normalize_absolute_dir("/"), "/");
        assert_eq!(normalize_absolute_dir(""), "./");
        assert_eq!(normalize_absolute_dir("/tmp/site"), "/tmp/site/");
        assert_eq!(normalize_absolute_dir("/tmp//site/./"), "/tmp/site/");
        assert_eq!(normalize_absolute_dir("/tmp/../site"), "/site/");
        assert_eq!(normalize_absolute_dir("/.."), "/");
        assert_eq!(normalize_absolute_dir("site"), "site/");
        assert_eq!(normalize_absolute_dir("../site"), "../site/");
    }

    #[tokio::test]
    async fn tags_newest_first() {
        let registry = MemoryRegistry::with_hostname("registry.test")
            .with_image("app", "old", at(1))
            .with_image("app", "unknown", None)
            .with_image("app", "new", at(5))
            .with_image("app", "mid", at(3));

        let data = filler(registry).repository_data("app").await.unwrap().unwrap();
        let order: Vec<_> = data.tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(order, ["new", "mid", "old", "unknown"]);
        assert_eq!(data.pull_reference, "registry.test/app:new");
        assert_eq!(data.last_updated_at, at(5));
        assert_eq!(data.base.absolute_dir, "/");
        assert_eq!(data.base.registry_name, "registry.test");
    }

    #[tokio::test]
    async fn failing_tags_are_skipped() {
        let registry = MemoryRegistry::new().with_image("app", "v1", at(1));
        registry.insert_tag("app", "v2");
        registry.insert("app", "v3", at(3));

        let filler = filler(registry);
        let data = filler.repository_data("app").await.unwrap().unwrap();
        let order: Vec<_> = data.tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(order, ["v3", "v1"]);
    }

    #[tokio::test]
    async fn missing_repositories() {
        let registry = MemoryRegistry::new();
        registry.insert_repository("empty");
        registry.insert_tag("dangling", "latest");
        let filler = filler(registry);

        assert_eq!(filler.repository_data("empty").await.unwrap(), None);
        assert_eq!(filler.repository_data("dangling").await.unwrap(), None);
        assert_eq!(filler.repository_data("nowhere").await.unwrap(), None);
        assert!(
            filler
                .repository_data("Not/Valid")
                .await
                .unwrap_err()
                .is_invalid_reference()
        );
    }

    #[tokio::test]
    async fn index_is_sorted_and_skips_empty() {
        let registry = MemoryRegistry::new()
            .with_image("zeta", "v1", at(1))
            .with_image("alpha", "v1", at(2))
            .with_image("team/mid", "v1", None);
        registry.insert_repository("empty");

        let index = filler(registry).index_data().await.unwrap();
        let names: Vec<_> = index
            .repositories
            .iter()
            .map(|r| r.repository_name.as_str())
            .collect();
        assert_eq!(names, ["alpha", "team/mid", "zeta"]);
    }
}
