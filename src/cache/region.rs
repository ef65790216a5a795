// src/cache/region.rs

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::trace;

use crate::error::Result;
use crate::storage::{check_replies, StorageBackend, StoragePipeline};

/// One named cache region.
///
/// Values are stored as JSON under the (optionally prefixed) key. The keys a region
/// wrote are tracked in the set `"{name}~keys"` so [`clear`](Cache::clear) only
/// removes this region's entries.
#[derive(Debug)]
pub struct Cache<S>
where
    S: StorageBackend,
{
    name: String,
    prefix: Option<String>,
    storage: S,
    expiration: Option<Duration>,
}

impl<S> Cache<S>
where
    S: StorageBackend,
{
    pub fn new(
        name: impl Into<String>,
        prefix: Option<String>,
        storage: S,
        expiration: Option<Duration>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix,
            storage,
            expiration,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Key the entry for `key` is stored under
    pub fn storage_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }

    fn known_keys_key(&self) -> String {
        format!("{}~keys", self.name)
    }

    /// Raw bytes stored for `key`
    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.storage.get(&self.storage_key(key)).await
    }

    /// Cached value for `key`, decoded from JSON
    pub async fn get<V>(&self, key: &str) -> Result<Option<V>>
    where
        V: DeserializeOwned,
    {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key`, applying the region TTL if there is one
    pub async fn put<V>(&self, key: &str, value: &V) -> Result<()>
    where
        V: Serialize + Sync + ?Sized,
    {
        let storage_key = self.storage_key(key);
        let known_keys = self.known_keys_key();
        let bytes = serde_json::to_vec(value)?;

        let mut pipeline = self.storage.pipeline();
        pipeline
            .set(&storage_key, &bytes, self.expiration)
            .set_add(&known_keys, storage_key.as_bytes());
        if let Some(ttl) = self.expiration {
            pipeline.expire(&known_keys, ttl);
        }
        check_replies(self.storage.execute_pipeline(pipeline).await?)?;

        trace!(cache = %self.name, key = %storage_key, "Cached value");
        Ok(())
    }

    /// Removes the entry for `key`
    pub async fn evict(&self, key: &str) -> Result<()> {
        let storage_key = self.storage_key(key);

        let mut pipeline = self.storage.pipeline();
        pipeline
            .delete(&storage_key)
            .set_remove(&self.known_keys_key(), storage_key.as_bytes());
        check_replies(self.storage.execute_pipeline(pipeline).await?)?;

        trace!(cache = %self.name, key = %storage_key, "Evicted value");
        Ok(())
    }

    /// Removes every entry this region wrote.
    ///
    /// Only the members listed at the start are untracked, so an entry put
    /// while the clear runs stays recorded and a later clear still finds it.
    /// The tracking set disappears on its own once it is empty.
    pub async fn clear(&self) -> Result<()> {
        let known_keys = self.known_keys_key();
        let members = self.storage.set_members(&known_keys).await?;
        if members.is_empty() {
            return Ok(());
        }

        let mut pipeline = self.storage.pipeline();
        for member in &members {
            pipeline
                .delete(&String::from_utf8_lossy(member))
                .set_remove(&known_keys, member);
        }
        check_replies(self.storage.execute_pipeline(pipeline).await?)?;

        trace!(cache = %self.name, removed = members.len(), "Cleared cache region");
        Ok(())
    }
}
