//! Periodic purge of expired entries for stores without native expiry.

use crate::storage::traits::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn a task that calls `purge_expired` every `interval` until `token` is cancelled.
pub fn spawn_sweeper(
    store: Arc<dyn KeyValueStore>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("expiry sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!(purged, "purged expired entries"),
                        Err(e) => tracing::warn!(error = ?e, "expiry sweep failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::storage::inmemory::MemoryKeyValueStore;

    #[tokio::test]
    async fn test_sweeper_purges_until_cancelled() {
        let clock = MockClock::default();
        let store = Arc::new(MemoryKeyValueStore::with_clock(Arc::new(clock.clone())));
        store
            .put("stale", "x", chrono::Duration::seconds(1))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(2));

        let token = CancellationToken::new();
        let handle = spawn_sweeper(store.clone(), Duration::from_millis(10), token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
