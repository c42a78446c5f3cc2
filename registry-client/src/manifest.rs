//! Manifest, index and image configuration documents.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};

use crate::error::{RegistryError, RegistryResult};

pub(crate) const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub(crate) const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub(crate) const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub(crate) const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Value for the `Accept` header on manifest requests.
pub(crate) const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

const PREFERRED_OS: &str = "linux";
const PREFERRED_ARCHITECTURE: &str = "amd64";

/// A content descriptor pointing at a blob or another manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Descriptor {
    #[serde(default)]
    pub(crate) media_type: Option<String>,
    pub(crate) digest: String,
    #[serde(default)]
    pub(crate) platform: Option<Platform>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Platform {
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
}

/// An image manifest: one config blob plus layers (which we don't need).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImageManifest {
    pub(crate) config: Descriptor,
}

/// A multi-platform index (OCI) or manifest list (Docker).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImageIndex {
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Pick the manifest to describe the tag: `linux/amd64` if present,
    /// otherwise the first entry.
    pub(crate) fn select(&self) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|descriptor| {
                descriptor.platform.as_ref().is_some_and(|platform| {
                    platform.os == PREFERRED_OS && platform.architecture == PREFERRED_ARCHITECTURE
                })
            })
            .or_else(|| self.manifests.first())
    }
}

/// A manifest response, classified by media type.
#[derive(Debug, Clone)]
pub(crate) enum ManifestDocument {
    Image(ImageManifest),
    Index(ImageIndex),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
    #[serde(default)]
    config: Option<serde_json::Value>,
}

impl ManifestDocument {
    /// Decode a manifest body. The `Content-Type` header wins; bodies without
    /// one fall back to the embedded `mediaType`, then to the document shape.
    pub(crate) fn parse(content_type: Option<&str>, body: &[u8]) -> RegistryResult<Self> {
        let envelope: Envelope =
            serde_json::from_slice(body).map_err(RegistryError::decode("manifest"))?;

        let media_type = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_owned())
            .filter(|ct| !ct.is_empty() && ct != "application/json")
            .or(envelope.media_type);

        let media_type = match media_type {
            Some(media_type) => media_type,
            None if envelope.manifests.is_some() => OCI_INDEX.to_owned(),
            None if envelope.config.is_some() => OCI_MANIFEST.to_owned(),
            None => return Err(RegistryError::UnsupportedManifest("unknown".into())),
        };

        match media_type.as_str() {
            OCI_MANIFEST | DOCKER_MANIFEST => serde_json::from_slice(body)
                .map(ManifestDocument::Image)
                .map_err(RegistryError::decode("image manifest")),
            OCI_INDEX | DOCKER_MANIFEST_LIST => serde_json::from_slice(body)
                .map(ManifestDocument::Index)
                .map_err(RegistryError::decode("image index")),
            _ => Err(RegistryError::UnsupportedManifest(media_type)),
        }
    }
}

/// The subset of the image configuration blob we read.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImageConfig {
    #[serde(default)]
    created: Option<DateTime<Utc>>,
}

impl ImageConfig {
    pub(crate) fn parse(body: &[u8]) -> RegistryResult<Self> {
        serde_json::from_slice(body).map_err(RegistryError::decode("image config"))
    }

    /// Creation time, treating the zero time some build tools write as absent.
    pub(crate) fn created(&self) -> Option<DateTime<Utc>> {
        self.created.filter(|created| created.timestamp() > 0)
    }
}

/// Check that `body` hashes to `digest`. Only `sha256` digests are verified;
/// other algorithms are accepted as-is.
pub(crate) fn verify_digest(digest: &str, body: &[u8]) -> RegistryResult<()> {
    let Some(expected) = digest.strip_prefix("sha256:") else {
        tracing::debug!(%digest, "skipping verification of non-sha256 digest");
        return Ok(());
    };

    let actual = hex::encode(Sha256::digest(body));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(RegistryError::DigestMismatch {
            expected: digest.to_owned(),
            actual: format!("sha256:{actual}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:arm", "size": 1,
             "platform": {"os": "linux", "architecture": "arm64"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:amd", "size": 1,
             "platform": {"os": "linux", "architecture": "amd64"}}
        ]
    }"#;

    #[test]
    fn index_prefers_linux_amd64() {
        let ManifestDocument::Index(index) = ManifestDocument::parse(None, INDEX.as_bytes()).unwrap()
        else {
            panic!("expected an index");
        };
        assert_eq!(index.select().unwrap().digest, "sha256:amd");
    }

    #[test]
    fn index_falls_back_to_first_entry() {
        let body = r#"{"manifests": [{"digest": "sha256:first"}, {"digest": "sha256:second"}]}"#;
        let ManifestDocument::Index(index) = ManifestDocument::parse(None, body.as_bytes()).unwrap()
        else {
            panic!("expected an index");
        };
        assert_eq!(index.select().unwrap().digest, "sha256:first");
    }

    #[test]
    fn content_type_wins_over_body() {
        let body = r#"{"schemaVersion": 2, "config": {"digest": "sha256:cfg", "size": 2}}"#;
        let document = ManifestDocument::parse(
            Some("application/vnd.docker.distribution.manifest.v2+json; charset=utf-8"),
            body.as_bytes(),
        )
        .unwrap();

        let ManifestDocument::Image(manifest) = document else {
            panic!("expected an image manifest");
        };
        assert_eq!(manifest.config.digest, "sha256:cfg");
    }

    #[test]
    fn schema1_is_unsupported() {
        let err = ManifestDocument::parse(
            Some("application/vnd.docker.distribution.manifest.v1+prettyjws"),
            br#"{"schemaVersion": 1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedManifest(_)));
    }

    #[test]
    fn config_created() {
        let config = ImageConfig::parse(br#"{"created": "2024-05-01T12:30:00Z"}"#).unwrap();
        assert_eq!(
            config.created().unwrap().to_rfc3339(),
            "2024-05-01T12:30:00+00:00"
        );

        let zeroed = ImageConfig::parse(br#"{"created": "1970-01-01T00:00:00Z"}"#).unwrap();
        assert!(zeroed.created().is_none());

        let missing = ImageConfig::parse(br#"{"architecture": "amd64"}"#).unwrap();
        assert!(missing.created().is_none());
    }

    #[test]
    fn digests() {
        let body = b"{}";
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(body)));
        assert!(verify_digest(&digest, body).is_ok());

        let err = verify_digest(
            "sha256:0000000000000000000000000000000000000000000000000000000000000000",
            body,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));

        assert!(verify_digest("sha512:whatever", body).is_ok());
    }
}
