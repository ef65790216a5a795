// src/storage/redis.rs

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, Pipeline, RedisResult};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::RedisConfig;
use crate::error::{KvError, Result, StorageError};
use crate::storage::{Reply, StorageBackend, StoragePipeline, StoreTransaction};
use crate::storage_op;

// Redis rejects a zero PX/PEXPIRE, round sub-millisecond TTLs up
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Redis pipeline implementation
pub struct RedisPipeline {
    pipeline: Pipeline,
}

impl RedisPipeline {
    /// Creates a new Redis pipeline
    fn new() -> Self {
        Self {
            pipeline: Pipeline::new(),
        }
    }
}

impl StoragePipeline for RedisPipeline {
    fn get(&mut self, key: &str) -> &mut Self {
        self.pipeline.cmd("GET").arg(key);
        self
    }

    fn set(&mut self, key: &str, value: &[u8], ttl: Option<Duration>) -> &mut Self {
        if let Some(ttl) = ttl {
            self.pipeline
                .cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl));
        } else {
            self.pipeline.cmd("SET").arg(key).arg(value);
        }
        self
    }

    fn increment(&mut self, key: &str, amount: i64) -> &mut Self {
        self.pipeline.cmd("INCRBY").arg(key).arg(amount);
        self
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> &mut Self {
        self.pipeline
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl));
        self
    }

    fn delete(&mut self, key: &str) -> &mut Self {
        self.pipeline.cmd("DEL").arg(key);
        self
    }

    fn set_add(&mut self, key: &str, member: &[u8]) -> &mut Self {
        self.pipeline.cmd("SADD").arg(key).arg(member);
        self
    }

    fn set_remove(&mut self, key: &str, member: &[u8]) -> &mut Self {
        self.pipeline.cmd("SREM").arg(key).arg(member);
        self
    }
}

/// Convert a Redis reply into the backend-neutral [`Reply`]
fn to_reply(value: redis::Value) -> Result<Reply> {
    let reply = match value {
        redis::Value::Nil => Reply::Nil,
        redis::Value::Int(i) => Reply::Integer(i),
        redis::Value::BulkString(bytes) => Reply::Data(bytes),
        redis::Value::SimpleString(s) => Reply::Status(s),
        redis::Value::Okay => Reply::Status("OK".to_string()),
        redis::Value::Boolean(b) => Reply::Integer(b as i64),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect::<Result<_>>()?)
        }
        redis::Value::ServerError(err) => Reply::Error(format!("{:?}", err)),
        other => {
            return Err(KvError::Storage(StorageError::Serialization(format!(
                "Unsupported Redis value type: {:?}",
                other
            ))))
        }
    };
    Ok(reply)
}

// Apply the configured timeout to a connection attempt
async fn connect_with_timeout<T, F>(url: &str, timeout: Duration, connect: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result.map_err(|e| KvError::connection(e.to_string())),
        Err(_) => Err(KvError::connection(format!(
            "Connection to Redis at {} timed out after {:?}",
            url, timeout
        ))),
    }
}

pub struct RedisStorage {
    client: Client,
    connection: ConnectionManager,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

// Manually implement Clone
impl Clone for RedisStorage {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            connection: self.connection.clone(),
            config: self.config.clone(),
        }
    }
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| KvError::connection(e.to_string()))?;

        let connection = connect_with_timeout(
            &config.url,
            config.connection_timeout,
            ConnectionManager::new(client.clone()),
        )
        .await?;

        Ok(Self {
            client,
            connection,
            config,
        })
    }

    /// Ping Redis to check health with timeout
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let ping_future = redis::AsyncCommands::ping::<String>(&mut conn);

        let result = match tokio::time::timeout(self.config.connection_timeout, ping_future).await {
            Ok(inner_result) => inner_result?,
            Err(_) => {
                return Err(KvError::connection(format!(
                    "Redis PING operation timed out after {:?}",
                    self.config.connection_timeout
                )));
            }
        };

        if result == "PONG" {
            Ok(())
        } else {
            Err(KvError::command(format!(
                "Unexpected response from Redis PING: {}",
                result
            )))
        }
    }
}

/// WATCH/MULTI/EXEC transaction on a dedicated connection.
///
/// WATCH state lives on the connection, so the shared multiplexed manager is never
/// used here; dropping the transaction closes the connection and releases the watch.
pub struct RedisTransaction {
    connection: MultiplexedConnection,
    watched: Vec<String>,
}

impl fmt::Debug for RedisTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTransaction")
            .field("watched", &self.watched)
            .finish()
    }
}

#[async_trait]
impl StoreTransaction for RedisTransaction {
    type Pipeline = RedisPipeline;

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let result: Option<Vec<u8>> = self.connection.get(key).await?;
        Ok(result)
    }

    fn multi(&self) -> Self::Pipeline {
        RedisPipeline::new()
    }

    async fn exec(mut self, pipeline: Self::Pipeline) -> Result<Option<Vec<Reply>>> {
        let mut pipeline = pipeline.pipeline;
        pipeline.atomic();

        // EXEC replies nil when a watched key changed
        let result: Option<Vec<redis::Value>> = pipeline.query_async(&mut self.connection).await?;

        match result {
            Some(values) => Ok(Some(
                values.into_iter().map(to_reply).collect::<Result<Vec<_>>>()?,
            )),
            None => {
                debug!(keys = ?self.watched, "EXEC aborted by a concurrent write");
                Ok(None)
            }
        }
    }

    async fn discard(mut self) -> Result<()> {
        let _: () = redis::cmd("UNWATCH")
            .query_async(&mut self.connection)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    type Config = RedisConfig;
    type Pipeline = RedisPipeline;
    type Transaction = RedisTransaction;

    async fn new(config: Self::Config) -> Result<Self> {
        Self::new(config).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let result: RedisResult<Option<Vec<u8>>> = conn.get(key).await;
        storage_op!("GET", key, result, started.elapsed().as_millis() as u64);

        Ok(result?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }

        let started = Instant::now();
        let result: RedisResult<()> = cmd.query_async(&mut conn).await;
        storage_op!("SET", key, result, started.elapsed().as_millis() as u64);

        Ok(result?)
    }

    async fn get_set(&self, key: &str, value: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let result: RedisResult<Option<Vec<u8>>> = conn.getset(key, value).await;
        storage_op!("GETSET", key, result, started.elapsed().as_millis() as u64);

        Ok(result?)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let result: RedisResult<i64> = conn.incr(key, amount).await;
        storage_op!("INCRBY", key, result, started.elapsed().as_millis() as u64);

        Ok(result?)
    }

    async fn decrement(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let result: RedisResult<i64> = conn.decr(key, amount).await;
        storage_op!("DECRBY", key, result, started.elapsed().as_millis() as u64);

        Ok(result?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let result: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let result: bool = conn.exists(key).await?;

        Ok(result)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let result: i64 = conn.del(key).await?;

        Ok(result > 0)
    }

    async fn set_add(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut conn = self.connection.clone();
        let result: i64 = conn.sadd(key, member).await?;

        Ok(result > 0)
    }

    async fn set_remove(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut conn = self.connection.clone();
        let result: i64 = conn.srem(key, member).await?;

        Ok(result > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let result: Vec<Vec<u8>> = conn.smembers(key).await?;

        Ok(result)
    }

    fn pipeline(&self) -> Self::Pipeline {
        RedisPipeline::new()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Reply>> {
        let mut conn = self.connection.clone();
        let results: Vec<redis::Value> = pipeline.pipeline.query_async(&mut conn).await?;

        results.into_iter().map(to_reply).collect()
    }

    async fn watch(&self, keys: &[&str]) -> Result<Self::Transaction> {
        let mut connection = connect_with_timeout(
            &self.config.url,
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await?;

        let mut cmd = redis::cmd("WATCH");
        for key in keys {
            cmd.arg(*key);
        }
        let _: () = cmd.query_async(&mut connection).await?;

        Ok(RedisTransaction {
            connection,
            watched: keys.iter().map(|key| key.to_string()).collect(),
        })
    }
}
