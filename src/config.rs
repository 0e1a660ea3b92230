//! Configuration management for Gatekeeper.
//!
//! A configuration selects one limiting strategy and, for the fixed-window
//! strategy, the counter store it talks to. It can be read from a YAML file
//! or layered from a file and `GATEKEEPER__*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{FixedWindowLimiter, RateLimiter, TokenBucket};
use crate::store::{CounterStore, MemoryStore, RedisStore, DEFAULT_OP_TIMEOUT};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Limiting strategy
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Counter store used by the fixed-window strategy
    #[serde(default)]
    pub store: StoreConfig,
}

/// Limiting strategy and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// Local token bucket
    TokenBucket {
        /// Tokens added per second
        rate: u64,
        /// Maximum burst size
        capacity: u64,
    },
    /// Fixed-window counter in a shared store
    FixedWindow {
        /// Counter name shared by every instance limiting the same resource
        key: String,
        /// Maximum admissions per window
        limit: u64,
        /// Window length in milliseconds
        window_ms: u64,
    },
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig::TokenBucket {
            rate: default_rate(),
            capacity: default_capacity(),
        }
    }
}

fn default_rate() -> u64 {
    5
}

fn default_capacity() -> u64 {
    10
}

/// Counter store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store; limits are not shared between processes
    #[default]
    Memory,
    /// Redis server
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which backend to use
    #[serde(default)]
    pub kind: StoreKind,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix applied to every counter key
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Bound on each store round trip, in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            url: default_redis_url(),
            key_prefix: None,
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_op_timeout_ms() -> u64 {
    DEFAULT_OP_TIMEOUT.as_millis() as u64
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, overridden by environment
    /// variables such as `GATEKEEPER__LIMITER__RATE=20`.
    ///
    /// Fields missing from both layers take their defaults, so environment
    /// variables alone are enough to configure a limiter.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, env_source())
    }

    fn load_layered(path: Option<&Path>, env: ::config::Environment) -> Result<Self> {
        let mut builder = Self::defaults()?;
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: GatekeeperConfig = builder
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Seed the layered builder with the defaults.
    ///
    /// Serde defaults only fill in a field that is missing entirely, so a
    /// partial `limiter` table built from environment variables would
    /// otherwise lack its `strategy` tag. Extra `rate`/`capacity` entries are
    /// ignored when another strategy is selected.
    fn defaults() -> Result<::config::ConfigBuilder<::config::builder::DefaultState>> {
        ::config::Config::builder()
            .set_default("limiter.strategy", "token_bucket")
            .and_then(|b| b.set_default("limiter.rate", default_rate()))
            .and_then(|b| b.set_default("limiter.capacity", default_capacity()))
            .and_then(|b| b.set_default("store.kind", "memory"))
            .and_then(|b| b.set_default("store.url", default_redis_url()))
            .and_then(|b| b.set_default("store.op_timeout_ms", default_op_timeout_ms()))
            .map_err(|e| GatekeeperError::Config(e.to_string()))
    }

    /// Reject parameters that would make a limiter meaningless.
    pub fn validate(&self) -> Result<()> {
        match &self.limiter {
            LimiterConfig::TokenBucket { rate, capacity } => {
                if *rate == 0 {
                    return Err(GatekeeperError::Config("rate must be positive".to_string()));
                }
                if *capacity == 0 {
                    return Err(GatekeeperError::Config("capacity must be positive".to_string()));
                }
            }
            LimiterConfig::FixedWindow {
                key,
                limit,
                window_ms,
            } => {
                if key.is_empty() {
                    return Err(GatekeeperError::Config("key must not be empty".to_string()));
                }
                if *limit == 0 {
                    return Err(GatekeeperError::Config("limit must be positive".to_string()));
                }
                if *window_ms == 0 {
                    return Err(GatekeeperError::Config("window_ms must be positive".to_string()));
                }
                if self.store.op_timeout_ms == 0 {
                    return Err(GatekeeperError::Config(
                        "op_timeout_ms must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Build the configured limiter.
    ///
    /// The fixed-window strategy connects to its store here; the token bucket
    /// needs no I/O.
    pub async fn build_limiter(&self) -> Result<Arc<dyn RateLimiter>> {
        self.validate()?;

        match &self.limiter {
            LimiterConfig::TokenBucket { rate, capacity } => {
                info!(rate, capacity, "Using local token bucket");
                Ok(Arc::new(TokenBucket::new(*rate, *capacity)))
            }
            LimiterConfig::FixedWindow {
                key,
                limit,
                window_ms,
            } => {
                info!(
                    key = %key,
                    limit,
                    window_ms,
                    store = ?self.store.kind,
                    "Using fixed-window counter"
                );
                let store = self.store.connect().await?;
                Ok(Arc::new(FixedWindowLimiter::new(
                    store,
                    key.clone(),
                    *limit,
                    Duration::from_millis(*window_ms),
                )))
            }
        }
    }
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

impl StoreConfig {
    /// Open the configured store.
    pub async fn connect(&self) -> Result<Arc<dyn CounterStore>> {
        match self.kind {
            StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreKind::Redis => {
                let timeout = Duration::from_millis(self.op_timeout_ms);
                let mut store = RedisStore::connect_with_timeout(&self.url, timeout).await?;
                if let Some(prefix) = &self.key_prefix {
                    store = store.with_key_prefix(prefix.clone());
                }
                Ok(Arc::new(store))
            }
        }
    }
}
