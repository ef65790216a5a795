// src/cache/mod.rs

//! Named cache regions over a key-value store.
//!
//! A [`CacheManager`] lazily creates one [`Cache`] per name. Each region may
//! namespace its keys with a prefix and may apply a TTL on every write, chosen
//! per name or from the manager-wide default.

mod region;


pub use region::Cache;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

use crate::config::CacheManagerConfig;
use crate::error::{KvError, Result};
use crate::storage::StorageBackend;

/// Strategy turning a cache name into the prefix for its keys
pub trait CachePrefix: Send + Sync + Debug {
    fn prefix(&self, cache_name: &str) -> String;
}

/// Prefixes keys with `"{name}{delimiter}"`
#[derive(Debug, Clone)]
pub struct DefaultCachePrefix {
    delimiter: String,
}

impl DefaultCachePrefix {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl Default for DefaultCachePrefix {
    fn default() -> Self {
        Self::new(":")
    }
}

impl CachePrefix for DefaultCachePrefix {
    fn prefix(&self, cache_name: &str) -> String {
        format!("{}{}", cache_name, self.delimiter)
    }
}

/// Lazily builds and hands out cache regions by name
#[derive(Debug)]
pub struct CacheManager<S>
where
    S: StorageBackend + Clone,
{
    storage: S,
    config: CacheManagerConfig,
    cache_prefix: Arc<dyn CachePrefix>,
    caches: RwLock<HashMap<String, Arc<Cache<S>>>>,
}

impl<S> CacheManager<S>
where
    S: StorageBackend + Clone,
{
    pub fn new(storage: S, config: CacheManagerConfig) -> Self {
        let cache_prefix = Arc::new(DefaultCachePrefix::new(config.prefix_delimiter.clone()));
        Self {
            storage,
            config,
            cache_prefix,
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the prefix strategy; only regions created afterwards use it
    pub fn with_cache_prefix(mut self, cache_prefix: impl CachePrefix + 'static) -> Self {
        self.cache_prefix = Arc::new(cache_prefix);
        self
    }

    /// TTL applied by the region `name`, `None` meaning never expire
    pub fn expiration_for(&self, name: &str) -> Option<Duration> {
        let expiration = self
            .config
            .expires
            .get(name)
            .copied()
            .unwrap_or(self.config.default_expiration);

        (!expiration.is_zero()).then_some(expiration)
    }

    /// Returns the region called `name`, creating it on first use
    pub fn cache(&self, name: &str) -> Result<Arc<Cache<S>>> {
        {
            let caches = self.caches.read().map_err(|_| lock_poisoned())?;
            if let Some(cache) = caches.get(name) {
                return Ok(Arc::clone(cache));
            }
        }

        let mut caches = self.caches.write().map_err(|_| lock_poisoned())?;
        let cache = caches.entry(name.to_string()).or_insert_with(|| {
            let prefix = self
                .config
                .use_prefix
                .then(|| self.cache_prefix.prefix(name));
            let expiration = self.expiration_for(name);
            debug!(cache = name, ?prefix, ?expiration, "Creating cache region");

            Arc::new(Cache::new(name, prefix, self.storage.clone(), expiration))
        });

        Ok(Arc::clone(cache))
    }

    /// Names of every region created so far, sorted
    pub fn cache_names(&self) -> Result<Vec<String>> {
        let caches = self.caches.read().map_err(|_| lock_poisoned())?;
        let mut names: Vec<String> = caches.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

fn lock_poisoned() -> KvError {
    KvError::Internal("cache registry lock poisoned".to_string())
}
