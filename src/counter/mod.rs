// src/counter/mod.rs

//! Atomic 64-bit counter bound to a single store key.
//!
//! Single-step arithmetic maps onto the store's native INCRBY/DECRBY/GETSET.
//! Compound operations use optimistic transactions: WATCH the key, read it on the
//! watching connection, queue the write after MULTI and EXEC. EXEC only applies
//! when nobody else touched the key since the WATCH.
//!
//! The counter never caches its value between calls; the store is the only
//! source of truth.

mod backoff;


pub use backoff::ExponentialBackoff;

use tracing::{debug, warn};

use crate::codec;
use crate::config::CounterConfig;
use crate::counter_event;
use crate::error::{KvError, Result, StorageError};
use crate::storage::{check_replies, StorageBackend, StoragePipeline, StoreTransaction};

/// How a counter initializes its key on construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    /// Keep the stored value, or write 0 when the key is absent.
    ///
    /// Best effort: two initializers racing on an absent key both write 0.
    ExistingOrZero,
    /// Overwrite whatever is stored with this value
    Value(i64),
}

/// Atomic counter backed by a key-value store
#[derive(Debug)]
pub struct AtomicCounter<S>
where
    S: StorageBackend,
{
    /// Key holding the counter value
    key: String,

    /// Storage backend the value lives in
    storage: S,

    /// Retry policy for get-and-modify operations
    config: CounterConfig,
}

impl<S> AtomicCounter<S>
where
    S: StorageBackend,
{
    /// Binds a counter to `key`, keeping its current value or starting at 0
    pub async fn new(key: impl Into<String>, storage: S) -> Result<Self> {
        Self::with_config(
            key,
            storage,
            CounterConfig::default(),
            Initialization::ExistingOrZero,
        )
        .await
    }

    /// Binds a counter to `key` and overwrites it with `initial_value`
    pub async fn with_initial_value(
        key: impl Into<String>,
        storage: S,
        initial_value: i64,
    ) -> Result<Self> {
        Self::with_config(
            key,
            storage,
            CounterConfig::default(),
            Initialization::Value(initial_value),
        )
        .await
    }

    pub async fn with_config(
        key: impl Into<String>,
        storage: S,
        config: CounterConfig,
        init: Initialization,
    ) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(KvError::Config("counter key must not be empty".to_string()));
        }

        let counter = Self {
            key,
            storage,
            config,
        };

        match init {
            Initialization::ExistingOrZero => {
                if counter.storage.get(&counter.key).await?.is_none() {
                    debug!(key = %counter.key, "Counter key absent, initializing to 0");
                    counter.set(0).await?;
                }
            }
            Initialization::Value(value) => counter.set(value).await?,
        }

        Ok(counter)
    }

    /// Key this counter is bound to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Gets the current value
    pub async fn get(&self) -> Result<i64> {
        match self.storage.get(&self.key).await? {
            Some(bytes) => codec::decode_i64(&self.key, &bytes),
            None => Err(KvError::not_found(&self.key)),
        }
    }

    /// Sets to the given value
    pub async fn set(&self, new_value: i64) -> Result<()> {
        self.storage
            .set(&self.key, &codec::encode_i64(new_value), None)
            .await?;
        counter_event!(self.key.as_str(), "set", new_value);
        Ok(())
    }

    /// Atomically sets to the given value and returns the old value.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` when the key was absent. The new value has
    /// already been written at that point, only the previous value is missing.
    pub async fn get_and_set(&self, new_value: i64) -> Result<i64> {
        let previous = self
            .storage
            .get_set(&self.key, &codec::encode_i64(new_value))
            .await?;

        match previous {
            Some(bytes) => codec::decode_i64(&self.key, &bytes),
            None => Err(KvError::not_found(&self.key)),
        }
    }

    /// Atomically increments by one and returns the updated value
    pub async fn increment_and_get(&self) -> Result<i64> {
        let value = self.storage.increment(&self.key, 1).await?;
        counter_event!(self.key.as_str(), "increment_and_get", value);
        Ok(value)
    }

    /// Atomically decrements by one and returns the updated value
    pub async fn decrement_and_get(&self) -> Result<i64> {
        let value = self.storage.decrement(&self.key, 1).await?;
        counter_event!(self.key.as_str(), "decrement_and_get", value);
        Ok(value)
    }

    /// Atomically adds `delta` and returns the updated value
    pub async fn add_and_get(&self, delta: i64) -> Result<i64> {
        let value = self.storage.increment(&self.key, delta).await?;
        counter_event!(self.key.as_str(), "add_and_get", value);
        Ok(value)
    }

    /// Atomically increments by one and returns the previous value
    pub async fn get_and_increment(&self) -> Result<i64> {
        self.get_and_add(1).await
    }

    /// Atomically decrements by one and returns the previous value
    pub async fn get_and_decrement(&self) -> Result<i64> {
        self.get_and_add(-1).await
    }

    /// Atomically adds `delta` and returns the previous value.
    ///
    /// The previous value is read under the watch, so it is exactly the value the
    /// committed increment was applied to. Aborted commits are retried with
    /// backoff until the retry budget runs out.
    pub async fn get_and_add(&self, delta: i64) -> Result<i64> {
        let mut backoff = ExponentialBackoff::new(self.config.retry.clone());

        loop {
            let mut tx = self.storage.watch(&[self.key.as_str()]).await?;
            let previous = match self.read_watched(&mut tx).await {
                Ok(value) => value,
                Err(e) => {
                    let _ = tx.discard().await;
                    return Err(e);
                }
            };

            let mut queue = tx.multi();
            queue.increment(&self.key, delta);

            if let Some(replies) = tx.exec(queue).await? {
                check_replies(replies)?;
                counter_event!(self.key.as_str(), "get_and_add", previous);
                return Ok(previous);
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    debug!(
                        key = %self.key,
                        attempt = backoff.attempts(),
                        ?delay,
                        "get-and-add aborted by a concurrent write, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        key = %self.key,
                        attempts = backoff.attempts(),
                        "get-and-add gave up after repeated concurrent writes"
                    );
                    return Err(StorageError::TransactionAborted {
                        key: self.key.clone(),
                        attempts: backoff.attempts(),
                    }
                    .into());
                }
            }
        }
    }

    /// Atomically sets the value to `update` if the current value equals `expect`.
    ///
    /// Makes a single attempt: `false` means either the value differed or a
    /// concurrent write aborted the commit. Neither case changes the stored value.
    pub async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        let mut tx = self.storage.watch(&[self.key.as_str()]).await?;

        let current = match self.read_watched(&mut tx).await {
            Ok(value) => value,
            Err(e) => {
                let _ = tx.discard().await;
                return Err(e);
            }
        };

        if current != expect {
            tx.discard().await?;
            debug!(key = %self.key, expect, current, "compare-and-set value mismatch");
            return Ok(false);
        }

        let mut queue = tx.multi();
        queue.set(&self.key, &codec::encode_i64(update), None);

        match tx.exec(queue).await? {
            Some(replies) => {
                check_replies(replies)?;
                counter_event!(self.key.as_str(), "compare_and_set", update);
                Ok(true)
            }
            None => {
                debug!(key = %self.key, expect, update, "compare-and-set aborted by a concurrent write");
                Ok(false)
            }
        }
    }

    async fn read_watched(&self, tx: &mut S::Transaction) -> Result<i64> {
        match tx.get(&self.key).await? {
            Some(bytes) => codec::decode_i64(&self.key, &bytes),
            None => Err(KvError::not_found(&self.key)),
        }
    }
}
