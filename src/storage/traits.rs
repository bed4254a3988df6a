//! Storage trait definitions for ephemeral OAuth state.
//!
//! Authorization codes and the token revocation ledger both sit on top of
//! a TTL-backed key-value store. Read-modify-delete sequences are exposed
//! as single primitives so that no backend can be used in a way that
//! opens a check-then-use window.

use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::Duration;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Outcome of an atomic consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// The value was present and has now been removed
    Value(String),
    /// The key was consumed earlier and its marker has not expired
    AlreadyConsumed,
    /// The key never existed or its TTL elapsed
    Missing,
}

/// TTL-backed key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store a value that expires after `ttl`, replacing any previous value
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Retrieve a live value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a value; returns whether anything was removed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically read and remove a value, leaving a consumed marker
    /// behind for `marker_ttl` so later attempts can be told apart from
    /// keys that never existed.
    async fn consume(&self, key: &str, marker_ttl: Duration) -> Result<Consumed>;

    /// Drop expired entries; backends with native expiry return 0
    async fn purge_expired(&self) -> Result<usize>;
}
