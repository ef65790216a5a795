// src/test_utils.rs

use super::error::{KvError, Result};
use super::storage::{
    MemoryPipeline, MemoryStorage, MemoryTransaction, Reply, StorageBackend, StoreTransaction,
};
use crate::config::InMemoryConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Memory storage without the background cleanup task
pub fn memory_storage() -> MemoryStorage {
    MemoryStorage::new(InMemoryConfig {
        max_entries: 1000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(1),
    })
}

/// Storage wrapper that simulates another client writing between WATCH and EXEC.
///
/// For the next `interruptions` transactions, every read made on the watching
/// connection is followed by `INCRBY key bump` from outside the transaction,
/// which makes the following EXEC abort.
#[derive(Debug, Clone)]
pub struct ContendedStorage<S> {
    inner: S,
    interruptions: Arc<AtomicUsize>,
    bump: i64,
}

impl<S> ContendedStorage<S>
where
    S: StorageBackend + Clone,
{
    pub fn new(inner: S, interruptions: usize, bump: i64) -> Self {
        Self {
            inner,
            interruptions: Arc::new(AtomicUsize::new(interruptions)),
            bump,
        }
    }

    /// Interruptions not yet injected
    pub fn remaining(&self) -> usize {
        self.interruptions.load(Ordering::SeqCst)
    }
}

/// Transaction handed out by [`ContendedStorage`]
pub struct ContendedTransaction<S>
where
    S: StorageBackend,
{
    tx: S::Transaction,
    writer: S,
    interruptions: Arc<AtomicUsize>,
    bump: i64,
}

#[async_trait]
impl<S> StoreTransaction for ContendedTransaction<S>
where
    S: StorageBackend + Clone + 'static,
{
    type Pipeline = S::Pipeline;

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.tx.get(key).await?;

        let claimed = self
            .interruptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            self.writer.increment(key, self.bump).await?;
        }

        Ok(value)
    }

    fn multi(&self) -> Self::Pipeline {
        self.tx.multi()
    }

    async fn exec(self, pipeline: Self::Pipeline) -> Result<Option<Vec<Reply>>> {
        self.tx.exec(pipeline).await
    }

    async fn discard(self) -> Result<()> {
        self.tx.discard().await
    }
}

#[async_trait]
impl<S> StorageBackend for ContendedStorage<S>
where
    S: StorageBackend + Clone + 'static,
{
    type Config = S::Config;
    type Pipeline = S::Pipeline;
    type Transaction = ContendedTransaction<S>;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(S::new(config).await?, 0, 1))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get_set(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get_set(key, value).await
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.inner.increment(key, amount).await
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64> {
        self.inner.decrement(key, amount).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn set_add(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.inner.set_members(key).await
    }

    fn pipeline(&self) -> Self::Pipeline {
        self.inner.pipeline()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Reply>> {
        self.inner.execute_pipeline(pipeline).await
    }

    async fn watch(&self, keys: &[&str]) -> Result<Self::Transaction> {
        Ok(ContendedTransaction {
            tx: self.inner.watch(keys).await?,
            writer: self.inner.clone(),
            interruptions: Arc::clone(&self.interruptions),
            bump: self.bump,
        })
    }
}

/// A write another client makes while a set is being read
#[derive(Debug, Clone)]
pub struct LateWrite {
    pub key: String,
    pub value: Vec<u8>,
    pub set_key: String,
}

/// Storage wrapper that lands one [`LateWrite`] right after the next
/// `set_members` call has read its members, as if another client raced it.
#[derive(Debug, Clone)]
pub struct LateWriteStorage<S> {
    inner: S,
    pending: Arc<Mutex<Option<LateWrite>>>,
}

impl<S> LateWriteStorage<S>
where
    S: StorageBackend + Clone,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Arms the write for the next `set_members` call
    pub fn arm(&self, write: LateWrite) {
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(write);
        }
    }

    fn take(&self) -> Option<LateWrite> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }
}

#[async_trait]
impl<S> StorageBackend for LateWriteStorage<S>
where
    S: StorageBackend + Clone + 'static,
{
    type Config = S::Config;
    type Pipeline = S::Pipeline;
    type Transaction = S::Transaction;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(S::new(config).await?))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn get_set(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get_set(key, value).await
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.inner.increment(key, amount).await
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64> {
        self.inner.decrement(key, amount).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn set_add(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let members = self.inner.set_members(key).await?;

        if let Some(write) = self.take() {
            self.inner.set(&write.key, &write.value, None).await?;
            self.inner
                .set_add(&write.set_key, write.key.as_bytes())
                .await?;
        }

        Ok(members)
    }

    fn pipeline(&self) -> Self::Pipeline {
        self.inner.pipeline()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Reply>> {
        self.inner.execute_pipeline(pipeline).await
    }

    async fn watch(&self, keys: &[&str]) -> Result<Self::Transaction> {
        self.inner.watch(keys).await
    }
}

/// Storage whose every call fails as if the store were unreachable
#[derive(Debug, Clone, Default)]
pub struct OfflineStorage;

fn offline<T>() -> Result<T> {
    Err(KvError::connection("store unreachable"))
}

#[async_trait]
impl StorageBackend for OfflineStorage {
    type Config = ();
    type Pipeline = MemoryPipeline;
    type Transaction = MemoryTransaction;

    async fn new(_config: Self::Config) -> Result<Self> {
        Ok(Self)
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        offline()
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> Result<()> {
        offline()
    }

    async fn get_set(&self, _key: &str, _value: &[u8]) -> Result<Option<Vec<u8>>> {
        offline()
    }

    async fn increment(&self, _key: &str, _amount: i64) -> Result<i64> {
        offline()
    }

    async fn decrement(&self, _key: &str, _amount: i64) -> Result<i64> {
        offline()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        offline()
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        offline()
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        offline()
    }

    async fn set_add(&self, _key: &str, _member: &[u8]) -> Result<bool> {
        offline()
    }

    async fn set_remove(&self, _key: &str, _member: &[u8]) -> Result<bool> {
        offline()
    }

    async fn set_members(&self, _key: &str) -> Result<Vec<Vec<u8>>> {
        offline()
    }

    fn pipeline(&self) -> Self::Pipeline {
        MemoryPipeline::default()
    }

    async fn execute_pipeline(&self, _pipeline: Self::Pipeline) -> Result<Vec<Reply>> {
        offline()
    }

    async fn watch(&self, _keys: &[&str]) -> Result<Self::Transaction> {
        offline()
    }
}
