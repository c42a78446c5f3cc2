//! Error types for registry access

use std::fmt;

use http::StatusCode;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// The object a registry could not find.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotFound {
    /// The repository does not exist, or has no known tag list.
    Repository(String),

    /// The tag does not exist, or has no known image metadata.
    Tag {
        /// Repository the tag was looked up in
        repository: String,
        /// Tag name
        tag: String,
    },
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFound::Repository(repository) => write!(f, "repository {repository}"),
            NotFound::Tag { repository, tag } => write!(f, "tag {repository}:{tag}"),
        }
    }
}

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The repository or tag is not known to the registry
    #[error("not found: {0}")]
    NotFound(NotFound),

    /// A repository name or tag is not a valid distribution reference
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// The request could not be sent, or the connection failed
    #[error("sending request: {0}")]
    Request(#[from] hyperdriver::client::Error),

    /// The response body could not be read
    #[error("reading response body: {0}")]
    Body(#[source] BoxError),

    /// The registry answered with an unexpected status
    #[error("HTTP {status} from {uri}: {message}")]
    Status {
        /// Response status
        status: StatusCode,
        /// Requested URI
        uri: String,
        /// Response body, or a short description of it
        message: String,
    },

    /// The registry rejected our credentials, or no token could be obtained
    #[error("authentication: {0}")]
    Authentication(String),

    /// A response body did not deserialize
    #[error("decoding {what}: {source}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// The underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The manifest uses a media type we can not interpret
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifest(String),

    /// Content did not match the digest it was requested by
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// The request could not be assembled
    #[error("building request: {0}")]
    Http(#[from] http::Error),
}

impl RegistryError {
    /// A missing repository.
    pub fn repository_not_found(repository: impl Into<String>) -> Self {
        RegistryError::NotFound(NotFound::Repository(repository.into()))
    }

    /// A missing tag.
    pub fn tag_not_found(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        RegistryError::NotFound(NotFound::Tag {
            repository: repository.into(),
            tag: tag.into(),
        })
    }

    /// Whether this error reports a missing repository or tag, as opposed to
    /// a failure to reach or understand the registry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }

    /// Whether this error reports a malformed repository name or tag.
    pub fn is_invalid_reference(&self) -> bool {
        matches!(self, RegistryError::InvalidReference(_))
    }

    pub(crate) fn decode(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| RegistryError::Decode { what, source }
    }
}
