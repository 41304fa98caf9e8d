//! Pool configuration and its TOML document form.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::directory::split_endpoints;

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone)]
pub struct PoolConfig {
    /// One or more server addresses delimited by commas or whitespace.
    pub endpoints: String,
    /// Identity used when a caller does not name one. Empty is anonymous.
    pub default_identity: String,
    /// Credential used when a caller does not supply one.
    pub default_credential: Vec<u8>,
    /// Maximum pooled connectors (default: 10). Zero disables growth.
    pub capacity: usize,
    /// Attempts per endpoint when connecting, and acquire attempts when full (default: 3).
    pub retry_max: u32,
    /// Sleep between per-endpoint connect attempts (default: 100ms).
    pub retry_delay: Duration,
    /// Upgrade each new connection to TLS before binding (default: false).
    pub use_tls: bool,
    /// Network timeout handed to the factory; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Bound connectors older than this are retired on the next scan (default: 600s).
    pub max_lifetime: Duration,
    /// Reuse connectors across acquisitions (default: true).
    pub pooling: bool,
    /// Sleep before evicting an idle connector when the pool is full (default: 100ms).
    pub exhausted_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoints: String::new(),
            default_identity: String::new(),
            default_credential: Vec::new(),
            capacity: 10,
            retry_max: 3,
            retry_delay: Duration::from_millis(100),
            use_tls: false,
            timeout: None,
            max_lifetime: Duration::from_secs(600),
            pooling: true,
            exhausted_backoff: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    pub fn new(endpoints: &str) -> Self {
        Self {
            endpoints: endpoints.to_string(),
            ..Self::default()
        }
    }

    /// Builder method: set the default bind identity and credential.
    pub fn with_credentials(mut self, identity: &str, credential: impl Into<Vec<u8>>) -> Self {
        self.default_identity = identity.to_string();
        self.default_credential = credential.into();
        self
    }

    pub fn endpoint_list(&self) -> Vec<&str> {
        split_endpoints(&self.endpoints)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: PoolSettings = toml::from_str(content)?;
        settings.into_config()
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading pool config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pool config {}", path.display()))
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("endpoints", &self.endpoints)
            .field("default_identity", &self.default_identity)
            .field("default_credential", &"<redacted>")
            .field("capacity", &self.capacity)
            .field("retry_max", &self.retry_max)
            .field("retry_delay", &self.retry_delay)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("pooling", &self.pooling)
            .field("exhausted_backoff", &self.exhausted_backoff)
            .finish()
    }
}

/// TOML representation of [`PoolConfig`]. Durations are seconds.
///
/// ```toml
/// endpoints = "ldap://dir1.example, ldap://dir2.example"
/// identity = "cn=admin,dc=example"
/// credential = "secret"
/// capacity = 5
/// retry_delay = 0.5
/// timeout = -1      # negative means no timeout
/// max_lifetime = 300
/// ```
#[derive(Clone, Deserialize)]
pub struct PoolSettings {
    pub endpoints: String,
    pub identity: Option<String>,
    pub credential: Option<String>,
    pub capacity: Option<usize>,
    pub retry_max: Option<u32>,
    pub retry_delay: Option<f64>,
    pub use_tls: Option<bool>,
    pub timeout: Option<f64>,
    pub max_lifetime: Option<f64>,
    pub pooling: Option<bool>,
    pub exhausted_backoff: Option<f64>,
}

impl PoolSettings {
    /// Fill a [`PoolConfig`], keeping defaults for unset keys.
    pub fn into_config(self) -> anyhow::Result<PoolConfig> {
        let defaults = PoolConfig::default();
        Ok(PoolConfig {
            endpoints: self.endpoints,
            default_identity: self.identity.unwrap_or_default(),
            default_credential: self.credential.map(String::into_bytes).unwrap_or_default(),
            capacity: self.capacity.unwrap_or(defaults.capacity),
            retry_max: self.retry_max.unwrap_or(defaults.retry_max),
            retry_delay: seconds("retry_delay", self.retry_delay)?.unwrap_or(defaults.retry_delay),
            use_tls: self.use_tls.unwrap_or(defaults.use_tls),
            timeout: match self.timeout {
                Some(secs) if secs < 0.0 => None,
                other => seconds("timeout", other)?,
            },
            max_lifetime: seconds("max_lifetime", self.max_lifetime)?
                .unwrap_or(defaults.max_lifetime),
            pooling: self.pooling.unwrap_or(defaults.pooling),
            exhausted_backoff: seconds("exhausted_backoff", self.exhausted_backoff)?
                .unwrap_or(defaults.exhausted_backoff),
        })
    }
}

impl fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSettings")
            .field("endpoints", &self.endpoints)
            .field("identity", &self.identity)
            .field("capacity", &self.capacity)
            .field("pooling", &self.pooling)
            .finish_non_exhaustive()
    }
}

fn seconds(key: &str, value: Option<f64>) -> anyhow::Result<Option<Duration>> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("`{key}` must be a non-negative number of seconds"))
        })
        .transpose()
}
