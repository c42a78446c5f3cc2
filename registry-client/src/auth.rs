//! Registry authentication.
//!
//! Registries either accept requests anonymously, ask for HTTP Basic
//! credentials, or hand out bearer tokens from a separate token service. The
//! latter is announced with a `WWW-Authenticate: Bearer realm=...` challenge on
//! a `401` response; the client then fetches a token for the requested scope
//! and retries.

use std::collections::HashMap;
use std::fmt;

use http::HeaderValue;
use serde::Deserialize;

use crate::secret::Secret;

/// Username and password for a registry.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: Option<Secret>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

impl Credentials {
    /// Credentials with a username and an optional password.
    pub fn new<U, P>(username: U, password: Option<P>) -> Self
    where
        U: Into<String>,
        P: Into<Secret>,
    {
        Self {
            username: username.into(),
            password: password.map(Into::into),
        }
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The `Authorization` header value for HTTP Basic authentication.
    pub fn basic(&self) -> HeaderValue {
        basic_auth(&self.username, self.password.as_ref().map(Secret::revealed))
    }
}

/// Create a basic authentication header value, with the password being optional.
///
/// ```rust
/// # use registry_client::Credentials;
/// let credentials = Credentials::new("username", Some("password"));
/// assert_eq!(credentials.basic().to_str().unwrap(), "Basic dXNlcm5hbWU6cGFzc3dvcmQ=");
/// ```
pub(crate) fn basic_auth<U, P>(username: U, password: Option<P>) -> HeaderValue
where
    U: fmt::Display,
    P: fmt::Display,
{
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:", username);
        if let Some(password) = password {
            let _ = write!(encoder, "{}", password);
        }
    }
    let mut header = HeaderValue::from_bytes(&buf).expect("base64 is always valid HeaderValue");
    header.set_sensitive(true);
    header
}

/// Build a sensitive `Bearer` header value.
pub(crate) fn bearer(token: &Secret) -> Option<HeaderValue> {
    let mut value = HeaderValue::try_from(format!("Bearer {}", token.revealed())).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Challenge {
    /// The registry wants HTTP Basic credentials.
    Basic,

    /// The registry wants a bearer token from `realm`.
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parse a challenge header, e.g.
    /// `Bearer realm="https://auth.example.com/token",service="registry",scope="repository:app:pull"`.
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = parse_params(rest);
        Some(Challenge::Bearer {
            realm: params.remove("realm")?,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }

    /// The same challenge, asking for a different scope.
    pub(crate) fn with_scope(&self, scope: &str) -> Self {
        match self {
            Challenge::Basic => Challenge::Basic,
            Challenge::Bearer { realm, service, .. } => Challenge::Bearer {
                realm: realm.clone(),
                service: service.clone(),
                scope: Some(scope.to_owned()),
            },
        }
    }
}

/// Parse comma separated `key="value"` pairs. Quoted values may contain commas.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim(), &after[end..]),
                None => (after.trim(), ""),
            }
        };

        params.insert(key, value.to_owned());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    params
}

/// The token service response. Docker Hub style services use `token`,
/// OAuth2 style services use `access_token`; some send both.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    token: Option<Secret>,
    access_token: Option<Secret>,
}

impl TokenResponse {
    pub(crate) fn into_token(self) -> Option<Secret> {
        self.token
            .filter(|token| !token.is_empty())
            .or(self.access_token.filter(|token| !token.is_empty()))
    }
}

/// The pull scope for a repository.
pub(crate) fn repository_scope(repository: &str) -> String {
    format!("repository:{repository}:pull")
}

/// Scope used for catalog requests.
pub(crate) const CATALOG_SCOPE: &str = "registry:catalog:*";
