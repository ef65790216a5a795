// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{KvError, Result};

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection timeout, also applied to the dedicated connection of each transaction
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

impl RedisConfig {
    /// Builds a config from `REDIS_URL` and `REDIS_CONNECTION_TIMEOUT_MS`.
    ///
    /// Missing variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("REDIS_URL") {
            config.url = url;
        }

        if let Ok(raw) = env::var("REDIS_CONNECTION_TIMEOUT_MS") {
            let millis = raw.parse::<u64>().map_err(|e| {
                KvError::Config(format!(
                    "REDIS_CONNECTION_TIMEOUT_MS must be a number of milliseconds: {}",
                    e
                ))
            })?;
            config.connection_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Retry policy for read-modify-write operations whose transaction was aborted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff duration
    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_use_jitter")]
    pub use_jitter: bool,
}

fn default_max_attempts() -> usize {
    32
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(1)
}

fn default_max_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_use_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: default_use_jitter(),
        }
    }
}

/// Configuration for atomic counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Retry policy for get-and-modify operations
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Configuration for the cache manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManagerConfig {
    /// Namespace every region's keys with the region prefix
    #[serde(default)]
    pub use_prefix: bool,

    /// Separator placed after the cache name by the default prefix strategy
    #[serde(default = "default_prefix_delimiter")]
    pub prefix_delimiter: String,

    /// Expiration for regions without their own entry; zero never expires
    #[serde(default, with = "duration_serde")]
    pub default_expiration: Duration,

    /// Per-region expiration, keyed by cache name
    #[serde(default, with = "duration_map_serde")]
    pub expires: HashMap<String, Duration>,
}

fn default_prefix_delimiter() -> String {
    ":".to_string()
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            use_prefix: false,
            prefix_delimiter: default_prefix_delimiter(),
            default_expiration: Duration::ZERO,
            expires: HashMap::new(),
        }
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// Same as duration_serde, for maps of name -> millis
mod duration_map_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &HashMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: HashMap<&String, u64> = map
            .iter()
            .map(|(name, duration)| (name, duration.as_millis() as u64))
            .collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = HashMap::<String, u64>::deserialize(deserializer)?;
        Ok(millis
            .into_iter()
            .map(|(name, ms)| (name, Duration::from_millis(ms)))
            .collect())
    }
}
