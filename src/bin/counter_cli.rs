// src/bin/counter_cli.rs

use dotenv::dotenv;
use std::time::Duration;
use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kv_atomic::config::{CacheManagerConfig, InMemoryConfig, RedisConfig};
use kv_atomic::storage::{MemoryStorage, RedisStorage, StorageBackend};
use kv_atomic::{AtomicCounter, CacheManager};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "counter_cli",
    about = "Run atomic counter and cache operations against a store"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "redis")]
    storage: String,

    /// Redis URL (when using Redis storage), defaults to REDIS_URL
    #[structopt(long)]
    redis_url: Option<String>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print the current value
    Get { key: String },
    /// Overwrite the value
    Set { key: String, value: i64 },
    /// Replace the value and print the previous one
    GetAndSet { key: String, value: i64 },
    /// Add a delta (default 1) and print the new value
    Incr {
        key: String,
        #[structopt(default_value = "1", allow_hyphen_values = true)]
        delta: i64,
    },
    /// Subtract one and print the new value
    Decr { key: String },
    /// Add a delta through a watched transaction and print the previous value
    GetAndAdd {
        key: String,
        #[structopt(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Set to `update` only if the value currently equals `expect`
    Cas {
        key: String,
        #[structopt(allow_hyphen_values = true)]
        expect: i64,
        #[structopt(allow_hyphen_values = true)]
        update: i64,
    },
    /// Store a JSON value in a cache region
    CachePut {
        cache: String,
        key: String,
        /// JSON document, e.g. '{"a":1}' or '"text"'
        value: String,
        /// Region TTL in seconds, 0 never expires
        #[structopt(long, default_value = "0")]
        ttl: u64,
        /// Namespace keys with "<cache>:"
        #[structopt(long)]
        prefix: bool,
    },
    /// Print a cached JSON value
    CacheGet {
        cache: String,
        key: String,
        #[structopt(long)]
        prefix: bool,
    },
    /// Remove one cached entry
    CacheEvict {
        cache: String,
        key: String,
        #[structopt(long)]
        prefix: bool,
    },
    /// Remove every entry a region wrote
    CacheClear {
        cache: String,
        #[structopt(long)]
        prefix: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "counter_cli={},kv_atomic={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let result = match opt.storage.as_str() {
        "memory" => {
            let storage = MemoryStorage::new(InMemoryConfig {
                max_entries: 10_000,
                use_background_task: false,
                cleanup_interval: Duration::from_secs(60),
            });
            run(storage, &opt.command).await
        }
        "redis" => {
            let mut config = RedisConfig::from_env()?;
            if let Some(url) = &opt.redis_url {
                config.url = url.clone();
            }
            let storage = RedisStorage::new(config.clone()).await?;
            info!(url = %config.url, "Connected to Redis");
            run(storage, &opt.command).await
        }
        other => Err(format!("Unknown storage backend: {}", other).into()),
    };

    if let Err(e) = &result {
        error!("Command failed: {}", e);
    }
    result
}

async fn run<S>(storage: S, command: &Command) -> Result<(), Box<dyn std::error::Error>>
where
    S: StorageBackend + Clone,
{
    match command {
        Command::Get { key } => {
            let counter = AtomicCounter::new(key.as_str(), storage).await?;
            println!("{}", counter.get().await?);
        }
        Command::Set { key, value } => {
            AtomicCounter::with_initial_value(key.as_str(), storage, *value).await?;
            println!("OK");
        }
        Command::GetAndSet { key, value } => {
            let counter = AtomicCounter::new(key.as_str(), storage).await?;
            println!("{}", counter.get_and_set(*value).await?);
        }
        Command::Incr { key, delta } => {
            let counter = AtomicCounter::new(key.as_str(), storage).await?;
            println!("{}", counter.add_and_get(*delta).await?);
        }
        Command::Decr { key } => {
            let counter = AtomicCounter::new(key.as_str(), storage).await?;
            println!("{}", counter.decrement_and_get().await?);
        }
        Command::GetAndAdd { key, delta } => {
            let counter = AtomicCounter::new(key.as_str(), storage).await?;
            println!("{}", counter.get_and_add(*delta).await?);
        }
        Command::Cas { key, expect, update } => {
            let counter = AtomicCounter::new(key.as_str(), storage).await?;
            let swapped = counter.compare_and_set(*expect, *update).await?;
            println!("{}", swapped);
            if !swapped {
                std::process::exit(1);
            }
        }
        Command::CachePut {
            cache,
            key,
            value,
            ttl,
            prefix,
        } => {
            let document: serde_json::Value = serde_json::from_str(value)?;
            let manager = cache_manager(storage, cache, *prefix, *ttl);
            manager.cache(cache)?.put(key, &document).await?;
            println!("OK");
        }
        Command::CacheGet { cache, key, prefix } => {
            let manager = cache_manager(storage, cache, *prefix, 0);
            match manager.cache(cache)?.get::<serde_json::Value>(key).await? {
                Some(document) => println!("{}", document),
                None => println!("(nil)"),
            }
        }
        Command::CacheEvict { cache, key, prefix } => {
            let manager = cache_manager(storage, cache, *prefix, 0);
            manager.cache(cache)?.evict(key).await?;
            println!("OK");
        }
        Command::CacheClear { cache, prefix } => {
            let manager = cache_manager(storage, cache, *prefix, 0);
            manager.cache(cache)?.clear().await?;
            println!("OK");
        }
    }

    Ok(())
}

fn cache_manager<S>(storage: S, cache: &str, use_prefix: bool, ttl_secs: u64) -> CacheManager<S>
where
    S: StorageBackend + Clone,
{
    let mut config = CacheManagerConfig {
        use_prefix,
        ..CacheManagerConfig::default()
    };
    config
        .expires
        .insert(cache.to_string(), Duration::from_secs(ttl_secs));

    CacheManager::new(storage, config)
}
