//! Configuration, from a TOML file and built-in defaults.
//!
//! ```toml
//! [registry]
//! hostname = "registry.example.com"
//! user = "robot"
//! password = "hunter2"
//!
//! [serve]
//! bind-addr = "0.0.0.0:8093"
//! cache-duration = "10m"
//! ignored-user-agents = ["kube-probe"]
//!
//! [serve.backoff]
//! max-elapsed = "5m"
//! ```
//!
//! Durations are written as `500ms`, `30s`, `10m`, `1h`, or a bare number of
//! seconds.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use mirror::{BackoffConfig, MirrorConfig};
use registry_client::{Credentials, RegistryHost, Secret};
use serde::Deserialize;

const DEFAULT_OUTPUT: &str = "/tmp/generated-registry-html";

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("reading {path}: {source}")]
    Io {
        /// File that was being read
        path: Utf8PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid
    #[error("parsing {path}: {source}")]
    Parse {
        /// File that was being parsed
        path: Utf8PathBuf,
        /// The underlying error
        #[source]
        source: toml_edit::de::Error,
    },

    /// No registry hostname was given
    #[error("a registry hostname is required")]
    MissingHostname,

    /// A duration could not be parsed
    #[error("invalid duration {0:?}, expected e.g. 500ms, 30s, 10m or 1h")]
    InvalidDuration(String),
}

/// All settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// The registry to browse.
    pub registry: RegistryConfig,

    /// Log output.
    pub logging: LoggingConfig,

    /// Static site generation.
    pub generate: GenerateConfig,

    /// The HTTP server.
    pub serve: ServeConfig,
}

impl Config {
    /// Load a TOML configuration file. Missing settings take their defaults.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(text)
    }
}

/// Where the registry is and how to log in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Hostname, optionally with a port.
    pub hostname: Option<String>,

    /// Username for basic or token authentication.
    pub user: Option<String>,

    /// Password for `user`.
    pub password: Option<Secret>,

    /// Use HTTPS (`true`) or plain HTTP (`false`).
    pub tls: bool,

    /// Overrides the `User-Agent` sent to the registry.
    pub user_agent: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            user: None,
            password: None,
            tls: true,
            user_agent: None,
        }
    }
}

impl RegistryConfig {
    /// The registry hostname, which must be set.
    pub fn hostname(&self) -> Result<&str, ConfigError> {
        self.hostname
            .as_deref()
            .filter(|hostname| !hostname.is_empty())
            .ok_or(ConfigError::MissingHostname)
    }

    /// Connection settings for the registry client.
    pub fn host(&self) -> Result<RegistryHost, ConfigError> {
        let credentials = self
            .user
            .as_ref()
            .map(|user| Credentials::new(user.clone(), self.password.clone()));

        Ok(RegistryHost::new(self.hostname()?)
            .tls(self.tls)
            .credentials(credentials)
            .user_agent(self.user_agent.clone()))
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human readable logs.
    pub json: bool,

    /// Log at debug level.
    pub verbose: bool,
}

/// Settings for `regview generate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct GenerateConfig {
    /// Directory to write the site into.
    pub output: Utf8PathBuf,

    /// URL path the site will be served from, used to build links.
    pub absolute_dir: String,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            output: DEFAULT_OUTPUT.into(),
            absolute_dir: DEFAULT_OUTPUT.into(),
        }
    }
}

/// Settings for `regview serve`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServeConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// How long rendered pages are cached. Zero caches forever.
    #[serde(deserialize_with = "duration::deserialize")]
    pub cache_duration: Duration,

    /// Time between catalog refreshes.
    #[serde(deserialize_with = "duration::deserialize")]
    pub refresh_interval: Duration,

    /// Requests whose `User-Agent` contains any of these get an empty response.
    pub ignored_user_agents: Vec<String>,

    /// Capacity of the repository queue.
    pub repository_queue: usize,

    /// Capacity of the image queue.
    pub image_queue: usize,

    /// Concurrent image info fetchers.
    pub image_workers: usize,

    /// Retry policy for listing the catalog.
    pub backoff: BackoffSettings,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8093)),
            cache_duration: Duration::from_secs(10 * 60),
            refresh_interval: Duration::from_secs(5 * 60),
            ignored_user_agents: Vec::new(),
            repository_queue: 10,
            image_queue: 10,
            image_workers: 1,
            backoff: BackoffSettings::default(),
        }
    }
}

impl ServeConfig {
    /// Page cache lifetime, with zero meaning forever.
    pub fn cache_lifetime(&self) -> Option<Duration> {
        (!self.cache_duration.is_zero()).then_some(self.cache_duration)
    }

    /// Settings for the registry mirror.
    pub fn mirror(&self) -> MirrorConfig {
        MirrorConfig::default()
            .refresh_interval(self.refresh_interval)
            .backoff(self.backoff.into())
            .repository_queue(self.repository_queue)
            .image_queue(self.image_queue)
            .image_workers(self.image_workers)
    }
}

/// Catalog retry settings, as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackoffSettings {
    /// Delay after the first failure.
    #[serde(deserialize_with = "duration::deserialize")]
    pub initial_interval: Duration,

    /// Growth factor between delays.
    #[serde(deserialize_with = "finite")]
    pub multiplier: f64,

    /// Longest single delay.
    #[serde(deserialize_with = "duration::deserialize")]
    pub max_interval: Duration,

    /// Give up after this long.
    #[serde(deserialize_with = "duration::deserialize")]
    pub max_elapsed: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        let defaults = BackoffConfig::default();
        Self {
            initial_interval: defaults.initial_interval,
            multiplier: defaults.multiplier,
            max_interval: defaults.max_interval,
            max_elapsed: defaults.max_elapsed,
        }
    }
}

impl From<BackoffSettings> for BackoffConfig {
    fn from(settings: BackoffSettings) -> Self {
        BackoffConfig {
            initial_interval: settings.initial_interval,
            multiplier: settings.multiplier,
            max_interval: settings.max_interval,
            max_elapsed: settings.max_elapsed,
        }
    }
}

/// Parse a duration such as `500ms`, `30s`, `10m`, `1h` or `45`.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_owned());

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let number: u64 = number.parse().map_err(|_| invalid())?;

    let duration = match unit.trim() {
        "" | "s" => Duration::from_secs(number),
        "ms" => Duration::from_millis(number),
        "m" => Duration::from_secs(number.checked_mul(60).ok_or_else(invalid)?),
        "h" => Duration::from_secs(number.checked_mul(60 * 60).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

fn finite<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() {
        return Err(serde::de::Error::custom(format!(
            "expected a finite number, got {value}"
        )));
    }
    Ok(value)
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error as _};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
            Raw::Text(text) => super::parse_duration(&text).map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);

        for bad in ["", "ms", "10d", "-5s", "1.5s"] {
            assert!(parse_duration(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.registry.tls);
        assert_eq!(config.generate.output, DEFAULT_OUTPUT);
        assert_eq!(config.serve.bind_addr.to_string(), "127.0.0.1:8093");
        assert_eq!(config.serve.cache_lifetime(), Some(Duration::from_secs(600)));
        assert_eq!(config.serve.mirror(), MirrorConfig::default());
        assert!(matches!(
            config.registry.host(),
            Err(ConfigError::MissingHostname)
        ));
    }

    #[test]
    fn full_file() {
        let config = Config::from_toml(
            r#"
            [registry]
            hostname = "localhost:5000"
            user = "robot"
            password = "hunter2"
            tls = false

            [logging]
            json = true

            [generate]
            output = "/srv/www"
            absolute-dir = "/registry"

            [serve]
            bind-addr = "0.0.0.0:9000"
            cache-duration = 0
            refresh-interval = "30s"
            ignored-user-agents = ["kube-probe", "Prometheus"]
            image-workers = 4

            [serve.backoff]
            initial-interval = "100ms"
            multiplier = 2.0
            max-elapsed = "1m"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.hostname().unwrap(), "localhost:5000");
        assert_eq!(config.registry.password.as_ref().unwrap().revealed(), "hunter2");
        assert!(!config.registry.tls);
        assert!(config.logging.json);
        assert_eq!(config.generate.absolute_dir, "/registry");
        assert_eq!(config.serve.cache_lifetime(), None);
        assert_eq!(config.serve.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.serve.ignored_user_agents.len(), 2);
        assert_eq!(config.serve.backoff.initial_interval, Duration::from_millis(100));
        assert_eq!(config.serve.backoff.max_interval, Duration::from_secs(10));
        assert_eq!(config.serve.backoff.max_elapsed, Duration::from_secs(60));

        let host = config.registry.host().unwrap();
        assert_eq!(host.hostname(), "localhost:5000");
    }

    #[test]
    fn multiplier_must_be_finite() {
        for value in ["inf", "-inf", "nan"] {
            let text = format!("[serve.backoff]\nmultiplier = {value}");
            assert!(Config::from_toml(&text).is_err(), "{value}");
        }

        let config = Config::from_toml("[serve.backoff]\nmultiplier = 1e30").unwrap();
        assert_eq!(config.serve.backoff.multiplier, 1e30);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("[serve]\nbind_addr = \"0.0.0.0:1\"").is_err());
    }
}
