//! Distributed recording configuration
//!
//! A [`DistributedConfig`] can come from a TOML document, from a
//! `key=value;key=value` string, or from `TALLY_DISTRIBUTED_*` environment
//! variables. Sources can be layered: each one only overrides the keys it
//! names. Every constructor validates eagerly.
//!
//! ```toml
//! enabled = true
//! host = "build-agent-3"
//! port = 1198
//! num_clients = 2
//! retry_period_ms = 500
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Prefix of the environment variables read by [`DistributedConfig::apply_env`].
pub const ENV_PREFIX: &str = "TALLY_DISTRIBUTED_";

/// Settings shared by the collector service and remote listeners.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistributedConfig {
    /// Whether distributed recording is on
    pub enabled: bool,
    /// Service name, reported in logs
    pub name: String,
    /// Collector host
    pub host: String,
    /// Collector port; 0 lets the service pick a free port
    pub port: u16,
    /// Connect and read timeout (ms)
    pub timeout_ms: u64,
    /// Clients the service waits for on start
    pub num_clients: u32,
    /// First reconnect delay (ms)
    pub retry_period_ms: u64,
    /// Reconnect delay ceiling (ms); the delay doubles up to this
    pub max_retry_period_ms: u64,
    /// Give up reconnecting after this many failures; unlimited when absent
    pub max_reconnect_attempts: Option<u32>,
    /// Oldest messages are dropped beyond this many buffered messages
    pub max_buffered_messages: usize,
    /// How long the service waits for `num_clients` on start (ms)
    pub client_wait_timeout_ms: u64,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        DistributedConfig {
            enabled: false,
            name: "tally.tcp.server".to_string(),
            host: "localhost".to_string(),
            port: 1198,
            timeout_ms: 5000,
            num_clients: 0,
            retry_period_ms: 1000,
            max_retry_period_ms: 30_000,
            max_reconnect_attempts: None,
            max_buffered_messages: 10_000,
            client_wait_timeout_ms: 60_000,
        }
    }
}

impl DistributedConfig {
    /// Config for tests: local host, ephemeral port, short delays.
    pub fn for_testing() -> Self {
        DistributedConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 0,
            timeout_ms: 2000,
            retry_period_ms: 20,
            max_retry_period_ms: 200,
            client_wait_timeout_ms: 5000,
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DistributedConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a `key=value;key=value` string over the defaults.
    ///
    /// A bare `true` or `false` entry sets `enabled`. Keys may be written in
    /// snake case or in camel case (`numClients`, `retryPeriod`).
    pub fn from_pairs(spec: &str) -> Result<Self, ConfigError> {
        let mut config = DistributedConfig::default();
        config.apply_pairs(spec)?;
        Ok(config)
    }

    /// Override keys from a `key=value;key=value` string.
    pub fn apply_pairs(&mut self, spec: &str) -> Result<(), ConfigError> {
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((key, value)) => self.set(key.trim(), value.trim())?,
                None => self.set("enabled", entry)?,
            }
        }
        self.validate()
    }

    /// Override keys from `TALLY_DISTRIBUTED_*` variables of this process.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(std::env::vars())
    }

    /// Override keys from `TALLY_DISTRIBUTED_*` entries of `vars`.
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            if let Some(suffix) = key.as_ref().strip_prefix(ENV_PREFIX) {
                self.set(&suffix.to_ascii_lowercase(), value.as_ref().trim())?;
            }
        }
        self.validate()
    }

    /// Set one key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "enabled" => self.enabled = parse(key, value)?,
            "name" => self.name = value.to_string(),
            "host" => self.host = value.to_string(),
            "port" => self.port = parse(key, value)?,
            "timeout" | "timeout_ms" => self.timeout_ms = parse(key, value)?,
            "numClients" | "num_clients" => self.num_clients = parse(key, value)?,
            "retryPeriod" | "retry_period" | "retry_period_ms" => {
                self.retry_period_ms = parse(key, value)?
            }
            "maxRetryPeriod" | "max_retry_period" | "max_retry_period_ms" => {
                self.max_retry_period_ms = parse(key, value)?
            }
            "maxReconnectAttempts" | "max_reconnect_attempts" => {
                self.max_reconnect_attempts = if value.is_empty() {
                    None
                } else {
                    Some(parse(key, value)?)
                }
            }
            "maxBufferedMessages" | "max_buffered_messages" => {
                self.max_buffered_messages = parse(key, value)?
            }
            "clientWaitTimeout" | "client_wait_timeout" | "client_wait_timeout_ms" => {
                self.client_wait_timeout_ms = parse(key, value)?
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.retry_period_ms == 0 {
            return Err(ConfigError::Invalid("retry_period_ms must be positive".into()));
        }
        if self.max_retry_period_ms < self.retry_period_ms {
            return Err(ConfigError::Invalid(format!(
                "max_retry_period_ms ({}) is below retry_period_ms ({})",
                self.max_retry_period_ms, self.retry_period_ms
            )));
        }
        if self.max_buffered_messages == 0 {
            return Err(ConfigError::Invalid(
                "max_buffered_messages must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` of the collector.
    pub fn server_location(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect and read timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// First reconnect delay.
    pub fn retry_period(&self) -> Duration {
        Duration::from_millis(self.retry_period_ms)
    }

    /// Reconnect delay ceiling.
    pub fn max_retry_period(&self) -> Duration {
        Duration::from_millis(self.max_retry_period_ms)
    }

    /// How long the service waits for its clients.
    pub fn client_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.client_wait_timeout_ms)
    }

    /// Set host and port
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set expected client count
    pub fn with_num_clients(mut self, n: u32) -> Self {
        self.num_clients = n;
        self
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// File
        path: String,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Config document is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Unrecognized key
    #[error("unknown config key '{0}'")]
    UnknownKey(String),

    /// Value does not parse for its key
    #[error("invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        /// Key
        key: String,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },

    /// Values parse but are inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}
