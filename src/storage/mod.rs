//! Trait-based TTL storage with in-memory and Redis backends.

pub mod inmemory;
pub mod sweeper;
pub mod traits;

// Feature-gated storage implementations
#[cfg(feature = "redis")]
pub mod redis;

// Re-export commonly used types and traits
pub use inmemory::MemoryKeyValueStore;
pub use sweeper::spawn_sweeper;
pub use traits::*;

#[cfg(feature = "redis")]
pub use self::redis::RedisKeyValueStore;

use crate::clock::Clock;
use crate::errors::{ConfigError, StorageError};
use std::sync::Arc;

/// Storage backend configuration and factory
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    #[cfg(feature = "redis")]
    Redis(String), // Connection URL
}

/// Create a storage backend based on configuration
pub fn create_storage_backend(
    backend: StorageBackend,
    clock: Arc<dyn Clock>,
    #[cfg_attr(not(feature = "redis"), allow(unused_variables))] timeout: std::time::Duration,
) -> std::result::Result<Arc<dyn KeyValueStore>, StorageError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryKeyValueStore::with_clock(clock))),
        #[cfg(feature = "redis")]
        StorageBackend::Redis(redis_url) => {
            Ok(Arc::new(RedisKeyValueStore::connect(&redis_url, timeout)?))
        }
    }
}

/// Parse storage backend from configuration string
pub fn parse_storage_backend(
    backend_name: &str,
    #[cfg_attr(not(feature = "redis"), allow(unused_variables))] redis_url: Option<&str>,
) -> std::result::Result<StorageBackend, ConfigError> {
    match backend_name {
        "memory" => Ok(StorageBackend::Memory),
        #[cfg(feature = "redis")]
        "redis" => {
            let url = redis_url.ok_or_else(|| {
                ConfigError::InvalidStorageBackend("REDIS_URL required for redis backend".to_string())
            })?;
            Ok(StorageBackend::Redis(url.to_string()))
        }
        _ => Err(ConfigError::InvalidStorageBackend(format!(
            "Unknown storage backend: {}",
            backend_name
        ))),
    }
}
