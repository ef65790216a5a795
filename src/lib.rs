// library entry
pub mod cache;
pub mod codec;
pub mod config;
pub mod counter;
pub mod error;
pub mod logging;
pub mod storage;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use cache::{Cache, CacheManager, CachePrefix, DefaultCachePrefix};
pub use counter::{AtomicCounter, Initialization};
pub use error::{KvError, Result, StorageError};
pub use logging::init as init_logging;
pub use storage::{StorageBackend, StoragePipeline, StoreTransaction};
