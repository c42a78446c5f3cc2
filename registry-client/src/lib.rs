//! # Container registry client
//!
//! Read-only access to a container registry speaking the
//! [OCI Distribution Specification](https://github.com/opencontainers/distribution-spec)
//! (the Docker Registry HTTP API v2).
//!
//! The [`Registry`] trait is the capability surface shared by every registry
//! backend: list the catalog, list the tags of one repository, and resolve the
//! image metadata for a single tag. Two implementations live here:
//!
//! - [`HttpRegistry`] talks to a real registry over HTTP(S).
//! - [`MemoryRegistry`] keeps everything in memory, for tests and demos.
//!
//! A third implementation, the periodically-refreshed mirror, lives in the
//! `mirror` crate and serves the same trait out of a cache.
//!
//! ## Example
//!
//! ```no_run
//! use registry_client::{HttpRegistry, Registry, RegistryHost};
//!
//! # async fn example() -> Result<(), registry_client::RegistryError> {
//! let registry = HttpRegistry::new(RegistryHost::new("localhost:5000").tls(false));
//!
//! for repository in registry.list_repositories().await? {
//!     let tags = registry.list_tags(&repository).await?;
//!     println!("{repository}: {}", tags.join(", "));
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

mod auth;
mod client;
mod error;
mod manifest;
mod memory;
pub mod mock;
mod paginate;
pub mod reference;
mod secret;

pub use self::auth::Credentials;
pub use self::client::{HttpRegistry, RegistryHost};
pub use self::error::{NotFound, RegistryError, RegistryResult};
pub use self::memory::MemoryRegistry;
pub use self::secret::Secret;

/// Metadata for a single tagged image.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageInfo {
    /// When the image was created, as recorded in the image configuration.
    ///
    /// Registries are free to omit this, and some build tools zero it out
    /// for reproducibility.
    pub created: Option<DateTime<Utc>>,

    /// Fully-qualified reference which can be handed to `docker pull`.
    pub reference: String,
}

impl ImageInfo {
    /// Create image info from a creation time and a pull reference.
    pub fn new(created: Option<DateTime<Utc>>, reference: impl Into<String>) -> Self {
        Self {
            created,
            reference: reference.into(),
        }
    }
}

/// Read access to a container registry.
///
/// Every call may fail independently. Missing repositories and tags are
/// reported as [`RegistryError::NotFound`], which callers can tell apart from
/// transient failures with [`RegistryError::is_not_found`].
#[async_trait::async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// List the names of every repository in the registry.
    async fn list_repositories(&self) -> RegistryResult<Vec<String>>;

    /// List the tags of a single repository.
    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>>;

    /// Resolve the creation time and pull reference of one tag.
    async fn image_info(&self, repository: &str, tag: &str) -> RegistryResult<ImageInfo>;
}

#[async_trait::async_trait]
impl<R> Registry for Arc<R>
where
    R: Registry + ?Sized,
{
    async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        (**self).list_repositories().await
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        (**self).list_tags(repository).await
    }

    async fn image_info(&self, repository: &str, tag: &str) -> RegistryResult<ImageInfo> {
        (**self).image_info(repository, tag).await
    }
}

#[async_trait::async_trait]
impl<R> Registry for Box<R>
where
    R: Registry + ?Sized,
{
    async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        (**self).list_repositories().await
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        (**self).list_tags(repository).await
    }

    async fn image_info(&self, repository: &str, tag: &str) -> RegistryResult<ImageInfo> {
        (**self).image_info(repository, tag).await
    }
}
