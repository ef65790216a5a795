// src/storage/memory.rs

// In-memory storage (for testing and lightweight usage)
// Mirrors the Redis semantics the counter and cache rely on: decimal integers,
// sets, per-key TTLs and WATCH-style conflict detection through key versions.
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, warn};

use crate::codec;
use crate::config::InMemoryConfig;
use crate::error::{KvError, Result, StorageError};
use crate::storage::{Reply, StorageBackend, StoragePipeline, StoreTransaction};

const WRONG_TYPE: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";

/// A simple pipeline implementation for in-memory storage
#[derive(Debug, Default)]
pub struct MemoryPipeline {
    operations: Vec<MemoryOperation>,
}

/// Represents an operation in the memory pipeline
#[derive(Debug)]
enum MemoryOperation {
    Get(String),
    Set(String, Vec<u8>, Option<Duration>),
    Increment(String, i64),
    Expire(String, Duration),
    Delete(String),
    SetAdd(String, Vec<u8>),
    SetRemove(String, Vec<u8>),
}

impl StoragePipeline for MemoryPipeline {
    fn get(&mut self, key: &str) -> &mut Self {
        self.operations.push(MemoryOperation::Get(key.to_string()));
        self
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self {
        self.operations
            .push(MemoryOperation::Set(key.to_string(), value.to_vec(), ttl));
        self
    }

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self {
        self.operations
            .push(MemoryOperation::Increment(key.to_string(), amount));
        self
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.operations
            .push(MemoryOperation::Expire(key.to_string(), ttl));
        self
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        self.operations.push(MemoryOperation::Delete(key.to_string()));
        self
    }

    fn set_add(&mut self, key: &str, member: &[u8]) -> &mut Self {
        self.operations
            .push(MemoryOperation::SetAdd(key.to_string(), member.to_vec()));
        self
    }

    fn set_remove(&mut self, key: &str, member: &[u8]) -> &mut Self {
        self.operations
            .push(MemoryOperation::SetRemove(key.to_string(), member.to_vec()));
        self
    }
}

#[derive(Debug, Clone)]
enum MemoryValue {
    Bytes(Vec<u8>),
    Set(HashSet<Vec<u8>>),
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: MemoryValue,
    expiry: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }
}

/// Keyspace plus the version bookkeeping used to detect writes between WATCH and EXEC.
///
/// Every mutation, deletion or expiry of a key bumps its version; versions outlive
/// the key itself so a delete-then-recreate is still seen as a change.
#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    versions: HashMap<String, u64>,
    clock: u64,
}

impl MemoryState {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            self.touch(key);
        }
    }

    fn purge_all_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
            self.touch(key);
        }

        expired.len()
    }

    fn ensure_capacity(&self, key: &str, max_entries: usize) -> Result<()> {
        if self.entries.len() >= max_entries && !self.entries.contains_key(key) {
            return Err(KvError::command("Maximum entries limit exceeded"));
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.purge_if_expired(key, Instant::now());
        match self.entries.get(key) {
            Some(MemoryEntry {
                value: MemoryValue::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(KvError::command(WRONG_TYPE)),
            None => Ok(None),
        }
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>, max: usize) -> Result<()> {
        self.purge_if_expired(key, Instant::now());
        self.ensure_capacity(key, max)?;

        // A plain SET drops any previous TTL
        let expiry = ttl.map(|duration| Instant::now() + duration);
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Bytes(value.to_vec()),
                expiry,
            },
        );
        self.touch(key);
        Ok(())
    }

    fn get_set(&mut self, key: &str, value: &[u8], max: usize) -> Result<Option<Vec<u8>>> {
        let previous = self.get(key)?;
        self.set(key, value, None, max)?;
        Ok(previous)
    }

    fn increment(&mut self, key: &str, amount: i64, max: usize) -> Result<i64> {
        self.purge_if_expired(key, Instant::now());

        let (current, expiry) = match self.entries.get(key) {
            Some(MemoryEntry {
                value: MemoryValue::Bytes(bytes),
                expiry,
            }) => {
                let current =
                    codec::decode_i64(key, bytes).map_err(|_| KvError::command(NOT_AN_INTEGER))?;
                (current, *expiry)
            }
            Some(_) => return Err(KvError::command(WRONG_TYPE)),
            None => {
                self.ensure_capacity(key, max)?;
                (0, None)
            }
        };

        let new_value = current
            .checked_add(amount)
            .ok_or_else(|| KvError::command("ERR increment or decrement would overflow"))?;

        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Bytes(codec::encode_i64(new_value)),
                expiry,
            },
        );
        self.touch(key);
        Ok(new_value)
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        self.purge_if_expired(key, Instant::now());
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expiry = Some(Instant::now() + ttl);
                self.touch(key);
                true
            }
            None => false,
        }
    }

    fn exists(&mut self, key: &str) -> bool {
        self.purge_if_expired(key, Instant::now());
        self.entries.contains_key(key)
    }

    fn delete(&mut self, key: &str) -> bool {
        self.purge_if_expired(key, Instant::now());
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.touch(key);
        }
        existed
    }

    fn set_add(&mut self, key: &str, member: &[u8], max: usize) -> Result<bool> {
        self.purge_if_expired(key, Instant::now());
        if !self.entries.contains_key(key) {
            self.ensure_capacity(key, max)?;
        }

        let entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: MemoryValue::Set(HashSet::new()),
            expiry: None,
        });
        let added = match &mut entry.value {
            MemoryValue::Set(members) => members.insert(member.to_vec()),
            MemoryValue::Bytes(_) => return Err(KvError::command(WRONG_TYPE)),
        };

        if added {
            self.touch(key);
        }
        Ok(added)
    }

    fn set_remove(&mut self, key: &str, member: &[u8]) -> Result<bool> {
        self.purge_if_expired(key, Instant::now());
        let (removed, now_empty) = match self.entries.get_mut(key) {
            Some(MemoryEntry {
                value: MemoryValue::Set(members),
                ..
            }) => (members.remove(member), members.is_empty()),
            Some(_) => return Err(KvError::command(WRONG_TYPE)),
            None => return Ok(false),
        };

        // Redis deletes a set once its last member is gone
        if now_empty {
            self.entries.remove(key);
        }
        if removed {
            self.touch(key);
        }
        Ok(removed)
    }

    fn set_members(&mut self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.purge_if_expired(key, Instant::now());
        match self.entries.get(key) {
            Some(MemoryEntry {
                value: MemoryValue::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(KvError::command(WRONG_TYPE)),
            None => Ok(Vec::new()),
        }
    }

    fn apply(&mut self, op: MemoryOperation, max: usize) -> Result<Reply> {
        let reply = match op {
            MemoryOperation::Get(key) => match self.get(&key)? {
                Some(bytes) => Reply::Data(bytes),
                None => Reply::Nil,
            },
            MemoryOperation::Set(key, value, ttl) => {
                self.set(&key, &value, ttl, max)?;
                Reply::Status("OK".to_string())
            }
            MemoryOperation::Increment(key, amount) => {
                Reply::Integer(self.increment(&key, amount, max)?)
            }
            MemoryOperation::Expire(key, ttl) => Reply::Integer(self.expire(&key, ttl) as i64),
            MemoryOperation::Delete(key) => Reply::Integer(self.delete(&key) as i64),
            MemoryOperation::SetAdd(key, member) => {
                Reply::Integer(self.set_add(&key, &member, max)? as i64)
            }
            MemoryOperation::SetRemove(key, member) => {
                Reply::Integer(self.set_remove(&key, &member)? as i64)
            }
        };
        Ok(reply)
    }

    // Runs every operation, a failing one leaves an error reply in its slot
    fn apply_all(&mut self, ops: Vec<MemoryOperation>, max: usize) -> Vec<Reply> {
        ops.into_iter()
            .map(|op| match self.apply(op, max) {
                Ok(reply) => reply,
                Err(KvError::Storage(StorageError::Command(msg))) => Reply::Error(msg),
                Err(e) => Reply::Error(e.to_string()),
            })
            .collect()
    }
}

/// Shared core behind every clone of a [`MemoryStorage`] and its transactions
#[derive(Debug)]
struct Inner {
    state: RwLock<MemoryState>,
    max_entries: usize,
}

impl Inner {
    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|_| KvError::Internal("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|_| KvError::Internal("memory storage lock poisoned".to_string()))
    }

    /// Fast path for reads: only takes the write lock when the key has expired
    fn read_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        {
            let state = self.read()?;
            match state.entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    return match &entry.value {
                        MemoryValue::Bytes(bytes) => Ok(Some(bytes.clone())),
                        MemoryValue::Set(_) => Err(KvError::command(WRONG_TYPE)),
                    };
                }
                Some(_) => {}
            }
        }
        self.write()?.get(key)
    }
}

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
    config: InMemoryConfig,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration
    pub fn new(config: InMemoryConfig) -> Self {
        let inner = Arc::new(Inner {
            state: RwLock::new(MemoryState::default()),
            max_entries: config.max_entries,
        });

        if config.use_background_task {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(Self::cleanup_loop(
                        Arc::downgrade(&inner),
                        config.cleanup_interval,
                    ));
                }
                Err(_) => {
                    warn!("No tokio runtime available, expired entries are purged lazily");
                }
            }
        }

        Self { inner, config }
    }

    /// Periodically purge expired entries until the storage is dropped
    async fn cleanup_loop(inner: Weak<Inner>, period: Duration) {
        let mut interval = time::interval(period);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let Ok(mut state) = inner.write() else {
                break;
            };
            let purged = state.purge_all_expired(Instant::now());
            if purged > 0 {
                debug!(purged, "Purged expired in-memory entries");
            }
        }
    }

    /// Configuration this storage was created with
    pub fn config(&self) -> &InMemoryConfig {
        &self.config
    }

    /// Number of live and not-yet-purged keys
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

/// Optimistic transaction over [`MemoryStorage`]
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    watched: Vec<(String, u64)>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    type Pipeline = MemoryPipeline;

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read_value(key)
    }

    fn multi(&self) -> Self::Pipeline {
        MemoryPipeline::default()
    }

    async fn exec(self, pipeline: Self::Pipeline) -> Result<Option<Vec<Reply>>> {
        let mut state = self.inner.write()?;
        let now = Instant::now();

        for (key, version) in &self.watched {
            state.purge_if_expired(key, now);
            if state.version(key) != *version {
                return Ok(None);
            }
        }

        Ok(Some(
            state.apply_all(pipeline.operations, self.inner.max_entries),
        ))
    }

    async fn discard(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Config = InMemoryConfig;
    type Pipeline = MemoryPipeline;
    type Transaction = MemoryTransaction;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(config))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.read_value(key)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.inner.write()?.set(key, value, ttl, self.inner.max_entries)
    }

    async fn get_set(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.write()?.get_set(key, value, self.inner.max_entries)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.inner
            .write()?
            .increment(key, amount, self.inner.max_entries)
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64> {
        let amount = amount
            .checked_neg()
            .ok_or_else(|| KvError::command(NOT_AN_INTEGER))?;
        self.inner
            .write()?
            .increment(key, amount, self.inner.max_entries)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.inner.write()?.expire(key, ttl))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.inner.write()?.exists(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.write()?.delete(key))
    }

    async fn set_add(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.inner
            .write()?
            .set_add(key, member, self.inner.max_entries)
    }

    async fn set_remove(&self, key: &str, member: &[u8]) -> Result<bool> {
        self.inner.write()?.set_remove(key, member)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        self.inner.write()?.set_members(key)
    }

    fn pipeline(&self) -> Self::Pipeline {
        MemoryPipeline::default()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Reply>> {
        let mut state = self.inner.write()?;
        Ok(state.apply_all(pipeline.operations, self.inner.max_entries))
    }

    async fn watch(&self, keys: &[&str]) -> Result<Self::Transaction> {
        let mut state = self.inner.write()?;
        let now = Instant::now();

        let watched = keys
            .iter()
            .map(|key| {
                state.purge_if_expired(key, now);
                (key.to_string(), state.version(key))
            })
            .collect();

        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            watched,
        })
    }
}
