use dotenv::dotenv;
use kv_atomic::config::{CacheManagerConfig, InMemoryConfig, RedisConfig};
use kv_atomic::storage::{MemoryStorage, RedisStorage};
use kv_atomic::{init_logging, AtomicCounter, CacheManager, StorageBackend};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("kv_atomic demo starting up");

    let result = if std::env::var("REDIS_URL").is_ok() {
        match RedisConfig::from_env() {
            Ok(config) => match RedisStorage::new(config).await {
                Ok(storage) => run(storage).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    } else {
        warn!("REDIS_URL not set, using in-memory storage");
        run(MemoryStorage::new(InMemoryConfig::default())).await
    };

    if let Err(e) = result {
        error!(error = %e, "Demo failed");
        std::process::exit(1);
    }
}

async fn run<S>(storage: S) -> kv_atomic::Result<()>
where
    S: StorageBackend + Clone,
{
    let counter = AtomicCounter::new("demo:visits", storage.clone()).await?;
    let previous = counter.get_and_increment().await?;
    let current = counter.increment_and_get().await?;
    info!(key = counter.key(), previous, current, "Counter updated");

    let swapped = counter.compare_and_set(current, 0).await?;
    info!(key = counter.key(), swapped, "Counter reset by compare-and-set");

    let manager = CacheManager::new(storage, CacheManagerConfig::default());
    let greetings = manager.cache("demo:greetings")?;
    greetings.put("en", "hello").await?;
    let cached: Option<String> = greetings.get("en").await?;
    info!(cache = greetings.name(), ?cached, "Cache round trip");

    Ok(())
}
