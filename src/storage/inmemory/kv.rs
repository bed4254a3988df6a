//! In-memory key-value storage implementation
//!
//! Entries carry an absolute expiry computed from the injected clock and
//! are treated as absent once it passes. Every operation holds the map
//! lock for its whole duration, which makes `consume` atomic.

use crate::clock::{Clock, SystemClock};
use crate::errors::StorageError;
use crate::storage::traits::{Consumed, KeyValueStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
enum Slot {
    Value(String),
    Consumed,
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: DateTime<Utc>,
}

/// In-memory TTL store (for testing/development and single-node deployments)
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("Lock error: {}", e)))
    }

    /// Look up a live entry, evicting it first if it has expired
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a Entry> {
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= now)
        {
            entries.remove(key);
        }
        entries.get(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(match Self::live(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Value(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let was_live = matches!(
            Self::live(&mut entries, key, now),
            Some(Entry {
                slot: Slot::Value(_),
                ..
            })
        );
        if was_live {
            entries.remove(key);
        }
        Ok(was_live)
    }

    async fn consume(&self, key: &str, marker_ttl: Duration) -> Result<Consumed> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        let outcome = match Self::live(&mut entries, key, now) {
            None => return Ok(Consumed::Missing),
            Some(Entry {
                slot: Slot::Consumed,
                ..
            }) => return Ok(Consumed::AlreadyConsumed),
            Some(Entry {
                slot: Slot::Value(value),
                ..
            }) => Consumed::Value(value.clone()),
        };

        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Consumed,
                expires_at: now + marker_ttl,
            },
        );

        Ok(outcome)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        let initial_count = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);

        Ok(initial_count - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn store_with_clock() -> (MemoryKeyValueStore, MockClock) {
        let clock = MockClock::default();
        (
            MemoryKeyValueStore::with_clock(Arc::new(clock.clone())),
            clock,
        )
    }

    #[tokio::test]
    async fn test_put_get_expires_with_clock() {
        let (store, clock) = store_with_clock();
        store
            .put("k", "v", Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(Duration::seconds(30));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_consume_is_one_shot() {
        let (store, _clock) = store_with_clock();
        store
            .put("code", "binding", Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(
            store.consume("code", Duration::minutes(10)).await.unwrap(),
            Consumed::Value("binding".to_string())
        );
        assert_eq!(
            store.consume("code", Duration::minutes(10)).await.unwrap(),
            Consumed::AlreadyConsumed
        );
        assert_eq!(store.get("code").await.unwrap(), None);
        assert_eq!(
            store.consume("other", Duration::minutes(10)).await.unwrap(),
            Consumed::Missing
        );
    }

    #[tokio::test]
    async fn test_consumed_marker_expires() {
        let (store, clock) = store_with_clock();
        store.put("code", "binding", Duration::minutes(10)).await.unwrap();
        store.consume("code", Duration::minutes(1)).await.unwrap();

        clock.advance(Duration::minutes(1));
        assert_eq!(
            store.consume("code", Duration::minutes(1)).await.unwrap(),
            Consumed::Missing
        );
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let (store, _clock) = store_with_clock();
        store.put("token", "meta", Duration::minutes(5)).await.unwrap();

        assert!(store.delete("token").await.unwrap());
        assert!(!store.delete("token").await.unwrap());
        assert!(!store.delete("never-stored").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();
        store.put("short", "a", Duration::seconds(1)).await.unwrap();
        store.put("long", "b", Duration::hours(1)).await.unwrap();

        clock.advance(Duration::seconds(5));

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long").await.unwrap(), Some("b".to_string()));
    }
}
