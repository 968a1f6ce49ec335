//! Configuration management for the rate limiter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::ratelimit::{FailureMode, LimitCategory, PolicyTable, RateLimit};

/// Environment prefix for layered configuration, e.g.
/// `MILES_RATELIMIT__STORE__URL` or `MILES_RATELIMIT__FAILURE_MODE`.
pub const ENV_PREFIX: &str = "MILES_RATELIMIT";

/// Conventional variable naming the shared store when the config does not.
pub const REDIS_URL_ENV: &str = "REDIS_URL";

/// Value of [`REDIS_URL_ENV`] that explicitly disables the shared store.
const REDIS_URL_DISABLED: &str = "not_set";

/// Main configuration for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// What to do when no store can answer
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Keys the local store tracks before refusing new ones
    #[serde(default = "default_local_max_keys")]
    pub local_max_keys: usize,

    /// How often idle local windows are purged
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Per-category overrides of the built-in policies
    #[serde(default)]
    pub limits: HashMap<LimitCategory, RateLimit>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            failure_mode: FailureMode::default(),
            local_max_keys: default_local_max_keys(),
            sweep_interval_secs: default_sweep_interval(),
            limits: HashMap::new(),
        }
    }
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL; falls back to `REDIS_URL` when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Per-check timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Connect and initial `PING` timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    crate::ratelimit::DEFAULT_STORE_TIMEOUT.as_millis() as u64
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_local_max_keys() -> usize {
    crate::ratelimit::DEFAULT_MAX_KEYS
}

fn default_sweep_interval() -> u64 {
    60
}

impl StoreConfig {
    /// The URL to connect to, if the shared store is enabled.
    pub fn resolved_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var(REDIS_URL_ENV).ok())
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty() && url != REDIS_URL_DISABLED)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl LimiterConfig {
    /// Load configuration from an optional file with environment overrides.
    ///
    /// The file format follows its extension (YAML, TOML, JSON).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading rate limiter configuration");
            builder = builder.add_source(config::File::from(path));
        }

        let config: LimiterConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Built-in policies with this configuration's overrides applied.
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::with_overrides(&self.limits)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
