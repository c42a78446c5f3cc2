//! HTTP(S) access to a registry speaking the distribution API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION, USER_AGENT, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use http_body_util::BodyExt as _;
use hyperdriver::service::SharedService;
use serde::de::DeserializeOwned;
use tower::ServiceExt as _;

use crate::auth::{bearer, repository_scope, Challenge, Credentials, TokenResponse, CATALOG_SCOPE};
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{verify_digest, ImageConfig, ManifestDocument, MANIFEST_ACCEPT};
use crate::paginate::{next_page, CatalogPage, Page, TagPage};
use crate::reference::{pull_reference, validate_repository, validate_tag};
use crate::secret::Secret;
use crate::{ImageInfo, Registry};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TIMEOUT: Duration = Duration::from_secs(60);
const PAGE_SIZE: usize = 1000;
const DEFAULT_USER_AGENT: &str = concat!("registry-client/", env!("CARGO_PKG_VERSION"));

/// Where a registry lives, and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHost {
    hostname: String,
    tls: bool,
    credentials: Option<Credentials>,
    user_agent: Option<String>,
}

impl RegistryHost {
    /// A registry at `hostname` (optionally with a port), reached over HTTPS.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            tls: true,
            credentials: None,
            user_agent: None,
        }
    }

    /// Use HTTPS (`true`, the default) or plain HTTP (`false`).
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Authenticate with these credentials when the registry asks.
    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Send this `User-Agent` instead of the default.
    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// The hostname, as it appears in pull references.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn base(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.hostname)
    }
}

/// A [`Registry`] backed by a live registry over HTTP(S).
///
/// Cloning is cheap, and clones share the connection pool and the token cache.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    host: RegistryHost,
    base: String,
    user_agent: HeaderValue,
    service: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,

    /// Bearer tokens by scope.
    tokens: DashMap<String, Secret>,

    /// The most recent challenge, used to authorize requests up front.
    challenge: ArcSwapOption<Challenge>,
}

/// A fully-read response.
#[derive(Debug)]
struct Fetched {
    uri: Uri,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Fetched {
    fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Turn any non-success status into an error.
    fn error_for_status(self) -> RegistryResult<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        let message = String::from_utf8_lossy(&self.body).trim().chars().take(200).collect();
        if self.status == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::Authentication(format!(
                "{} rejected credentials: {message}",
                self.uri
            )));
        }

        Err(RegistryError::Status {
            status: self.status,
            uri: self.uri.to_string(),
            message,
        })
    }

    fn json<T: DeserializeOwned>(&self, what: &'static str) -> RegistryResult<T> {
        serde_json::from_slice(&self.body).map_err(RegistryError::decode(what))
    }
}

impl HttpRegistry {
    /// Connect to the registry described by `host`.
    pub fn new(host: RegistryHost) -> Self {
        let mut builder = hyperdriver::Client::build_tcp_http();
        builder.transport().config_mut().connect_timeout = Some(CONNECT_TIMEOUT);

        let service = builder
            .with_default_tls()
            .with_timeout(TIMEOUT)
            .build_service();

        Self::from_parts(host, service)
    }

    /// Use `inner` to send requests instead of a real HTTP client.
    pub fn new_with_inner_service<S>(host: RegistryHost, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .service(inner);

        Self::from_parts(host, service)
    }

    fn from_parts(
        host: RegistryHost,
        service: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,
    ) -> Self {
        let user_agent = host
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok())
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_USER_AGENT));

        Self {
            inner: Arc::new(Inner {
                base: host.base(),
                host,
                user_agent,
                service,
                tokens: DashMap::new(),
                challenge: ArcSwapOption::empty(),
            }),
        }
    }

    /// The registry this client talks to.
    pub fn host(&self) -> &RegistryHost {
        &self.inner.host
    }

    fn uri(&self, path_and_query: &str) -> RegistryResult<Uri> {
        format!("{}{path_and_query}", self.inner.base)
            .parse()
            .map_err(|error| RegistryError::Http(http::Error::from(error)))
    }

    async fn send(
        &self,
        uri: &Uri,
        accept: Option<&'static str>,
        authorization: Option<HeaderValue>,
    ) -> RegistryResult<Fetched> {
        let mut request = http::Request::get(uri.clone()).header(USER_AGENT, self.inner.user_agent.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        let request = request.body(hyperdriver::Body::empty())?;

        tracing::trace!(%uri, "GET");
        let response = self.inner.service.clone().oneshot(request).await?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|error| RegistryError::Body(error.into()))?
            .to_bytes();

        Ok(Fetched {
            uri: uri.clone(),
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// GET `uri`, answering at most one authentication challenge.
    ///
    /// The response is returned whatever its status; callers decide which
    /// statuses mean "not found".
    async fn get(
        &self,
        uri: &Uri,
        accept: Option<&'static str>,
        scope: &str,
    ) -> RegistryResult<Fetched> {
        let known = self.inner.challenge.load_full();
        let authorization = match known.as_deref() {
            Some(challenge) => self.authorize(&challenge.with_scope(scope), scope).await?,
            None => None,
        };
        let preauthorized = authorization.is_some();

        let response = self.send(uri, accept, authorization).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse)
        else {
            return Ok(response);
        };

        if preauthorized {
            tracing::debug!(%uri, %scope, "cached authorization rejected");
            self.inner.tokens.remove(scope);
        }
        self.inner.challenge.store(Some(Arc::new(challenge.clone())));

        match self.authorize(&challenge, scope).await? {
            Some(authorization) => self.send(uri, accept, Some(authorization)).await,
            None => Ok(response),
        }
    }

    /// Produce an `Authorization` header answering `challenge`, if we can.
    async fn authorize(
        &self,
        challenge: &Challenge,
        scope: &str,
    ) -> RegistryResult<Option<HeaderValue>> {
        match challenge {
            Challenge::Basic => Ok(self.inner.host.credentials.as_ref().map(Credentials::basic)),
            Challenge::Bearer {
                realm,
                service,
                scope: requested,
            } => {
                let scope = requested.as_deref().unwrap_or(scope);
                if let Some(token) = self.inner.tokens.get(scope) {
                    return Ok(bearer(&token));
                }

                let token = self.fetch_token(realm, service.as_deref(), scope).await?;
                let header = bearer(&token);
                self.inner.tokens.insert(scope.to_owned(), token);
                Ok(header)
            }
        }
    }

    async fn fetch_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: &str,
    ) -> RegistryResult<Secret> {
        let mut url = url::Url::parse(realm).map_err(|error| {
            RegistryError::Authentication(format!("invalid token realm {realm}: {error}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|error| RegistryError::Http(http::Error::from(error)))?;

        tracing::debug!(%realm, %scope, "requesting bearer token");
        let authorization = self.inner.host.credentials.as_ref().map(Credentials::basic);
        let response = self.send(&uri, None, authorization).await?;
        if !response.status.is_success() {
            return Err(RegistryError::Authentication(format!(
                "token service {realm} answered {}",
                response.status
            )));
        }

        response
            .json::<TokenResponse>("token response")?
            .into_token()
            .ok_or_else(|| {
                RegistryError::Authentication(format!("token service {realm} sent no token"))
            })
    }

    async fn list_paginated<P>(
        &self,
        path_and_query: &str,
        scope: &str,
        what: &'static str,
        not_found: impl Fn() -> RegistryError,
    ) -> RegistryResult<Vec<String>>
    where
        P: Page + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut uri = self.uri(path_and_query)?;
        let mut visited = HashSet::new();

        loop {
            visited.insert(uri.clone());
            let response = self.get(&uri, None, scope).await?;
            if response.status == StatusCode::NOT_FOUND {
                return Err(not_found());
            }
            let response = response.error_for_status()?;
            items.extend(response.json::<P>(what)?.items());

            // A registry linking back to a page we already read would loop forever.
            match next_page(&response.headers, &uri) {
                Some(next) if !visited.contains(&next) => uri = next,
                Some(next) => {
                    tracing::warn!(%next, "{what} pagination links back to a page already read");
                    break;
                }
                None => break,
            }
        }

        Ok(items)
    }

    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
        scope: &str,
    ) -> RegistryResult<Option<ManifestDocument>> {
        let uri = self.uri(&format!("/v2/{repository}/manifests/{reference}"))?;
        let response = self.get(&uri, Some(MANIFEST_ACCEPT), scope).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;

        ManifestDocument::parse(response.content_type(), &response.body).map(Some)
    }

    async fn fetch_blob(&self, repository: &str, digest: &str, scope: &str) -> RegistryResult<Bytes> {
        let uri = self.uri(&format!("/v2/{repository}/blobs/{digest}"))?;
        let mut response = self.get(&uri, None, scope).await?;

        // Blob storage is often fronted by a CDN, which must not see our credentials.
        if response.status.is_redirection() {
            let target = response
                .headers
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| url::Url::parse(&uri.to_string()).ok()?.join(location).ok())
                .and_then(|location| location.as_str().parse::<Uri>().ok());

            if let Some(target) = target {
                tracing::trace!(from = %uri, to = %target, "following blob redirect");
                response = self.send(&target, None, None).await?;
            }
        }

        let response = response.error_for_status()?;
        verify_digest(digest, &response.body)?;
        Ok(response.body)
    }
}

#[async_trait::async_trait]
impl Registry for HttpRegistry {
    #[tracing::instrument(skip(self), fields(registry = %self.inner.host.hostname))]
    async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        self.list_paginated::<CatalogPage>(
            &format!("/v2/_catalog?n={PAGE_SIZE}"),
            CATALOG_SCOPE,
            "catalog",
            || RegistryError::Status {
                status: StatusCode::NOT_FOUND,
                uri: "/v2/_catalog".into(),
                message: "registry does not expose a catalog".into(),
            },
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(registry = %self.inner.host.hostname))]
    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        validate_repository(repository)?;

        self.list_paginated::<TagPage>(
            &format!("/v2/{repository}/tags/list?n={PAGE_SIZE}"),
            &repository_scope(repository),
            "tag list",
            || RegistryError::repository_not_found(repository),
        )
        .await
    }

    #[tracing::instrument(skip(self), fields(registry = %self.inner.host.hostname))]
    async fn image_info(&self, repository: &str, tag: &str) -> RegistryResult<ImageInfo> {
        validate_repository(repository)?;
        validate_tag(tag)?;
        let scope = repository_scope(repository);

        let manifest = match self.fetch_manifest(repository, tag, &scope).await? {
            Some(ManifestDocument::Image(manifest)) => manifest,
            Some(ManifestDocument::Index(index)) => {
                let descriptor = index.select().ok_or_else(|| {
                    RegistryError::UnsupportedManifest(format!("{repository}:{tag} has an empty index"))
                })?;
                tracing::trace!(digest = %descriptor.digest, "resolved index entry");

                match self
                    .fetch_manifest(repository, &descriptor.digest, &scope)
                    .await?
                {
                    Some(ManifestDocument::Image(manifest)) => manifest,
                    Some(ManifestDocument::Index(_)) => {
                        return Err(RegistryError::UnsupportedManifest(format!(
                            "{repository}:{tag} has a nested index"
                        )))
                    }
                    None => return Err(RegistryError::tag_not_found(repository, tag)),
                }
            }
            None => return Err(RegistryError::tag_not_found(repository, tag)),
        };

        let config = self
            .fetch_blob(repository, &manifest.config.digest, &scope)
            .await?;
        let config = ImageConfig::parse(&config)?;

        Ok(ImageInfo::new(
            config.created(),
            pull_reference(&self.inner.host.hostname, repository, tag),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls() {
        assert_eq!(RegistryHost::new("ghcr.io").base(), "https://ghcr.io");
        assert_eq!(
            RegistryHost::new("localhost:5000").tls(false).base(),
            "http://localhost:5000"
        );
    }

    #[test]
    fn registry_futures_are_send() {
        fn assert_send<T: Send>(_t: T) {}

        let registry = HttpRegistry::new_with_inner_service(
            RegistryHost::new("localhost:5000").tls(false),
            crate::mock::MockService::new(),
        );
        assert_send(registry.list_repositories());
        assert_send(registry.image_info("app", "v1"));
    }
}
