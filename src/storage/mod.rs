// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::{MemoryPipeline, MemoryStorage, MemoryTransaction};
pub use redis::{RedisPipeline, RedisStorage, RedisTransaction};

use super::error::{KvError, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// A single reply from a queued command.
///
/// A command that fails inside a batch does not stop the others, its slot
/// holds [`Reply::Error`] and the remaining commands still run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Data(Vec<u8>),
    Status(String),
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&str> {
        match self {
            Reply::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Fails with the first per-command error in a batch of replies
pub fn check_replies(replies: Vec<Reply>) -> Result<Vec<Reply>> {
    match replies.iter().find_map(Reply::as_error) {
        Some(msg) => Err(KvError::command(msg)),
        None => Ok(replies),
    }
}

// Represents a queue of commands, sent as a batch or inside a transaction
pub trait StoragePipeline: Send + Sync {
    // Add a get operation to the pipeline
    fn get(&mut self, key: &str) -> &mut Self;

    // Add a set operation to the pipeline
    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self;

    // Add an increment operation to the pipeline
    fn increment(&mut self, key: &str, amount: i64) -> &mut Self;

    // Add an expire operation to the pipeline
    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self;

    // Add a delete operation to the pipeline
    fn delete(&mut self, key: &str) -> &mut Self;

    // Add a set-membership insert to the pipeline
    fn set_add(&mut self, key: &str, member: &[u8]) -> &mut Self;

    // Add a set-membership removal to the pipeline
    fn set_remove(&mut self, key: &str, member: &[u8]) -> &mut Self;
}

/// An optimistic transaction bound to one connection.
///
/// Created by [`StorageBackend::watch`]. Commands queued with [`multi`](Self::multi)
/// only take effect on [`exec`](Self::exec), and only if no watched key changed
/// since the watch was established.
#[async_trait]
pub trait StoreTransaction: Send {
    type Pipeline: StoragePipeline;

    /// Reads a key on the transaction's own connection
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Starts queuing commands (MULTI)
    fn multi(&self) -> Self::Pipeline;

    /// Commits the queued commands (EXEC).
    ///
    /// Returns `None` when a watched key was modified and nothing was applied.
    async fn exec(self, pipeline: Self::Pipeline) -> Result<Option<Vec<Reply>>>;

    /// Abandons the transaction and releases the watched keys
    async fn discard(self) -> Result<()>;
}

/// Core trait that all storage backends must implement
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // The type of configuration this storage backend accepts
    type Config: Send + Sync;

    // The type of pipeline this storage backend uses
    type Pipeline: StoragePipeline;

    // The type of optimistic transaction this storage backend hands out
    type Transaction: StoreTransaction<Pipeline = Self::Pipeline>;

    // Creates a new instance of this storage backend with the given configuration
    async fn new(config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value with a key
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    // Atomically replaces a value and returns the previous one
    async fn get_set(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>>;

    // Atomically increments a counter
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    // Atomically decrements a counter
    async fn decrement(&self, key: &str, amount: i64) -> Result<i64>;

    // Sets expiration time for a key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // Deletes a key
    async fn delete(&self, key: &str) -> Result<bool>;

    // Adds a member to the set stored at key
    async fn set_add(&self, key: &str, member: &[u8]) -> Result<bool>;

    // Removes a member from the set stored at key
    async fn set_remove(&self, key: &str, member: &[u8]) -> Result<bool>;

    // Lists the members of the set stored at key
    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    // Creates a new pipeline for executing multiple operations
    fn pipeline(&self) -> Self::Pipeline;

    // Executes a pipeline of operations
    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Reply>>;

    // Watches keys for modification and opens a transaction (WATCH)
    async fn watch(&self, keys: &[&str]) -> Result<Self::Transaction>;
}
