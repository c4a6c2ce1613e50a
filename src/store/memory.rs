//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::{CounterStore, IncrementOutcome};
use crate::clock;
use crate::error::Result;

/// How often the background sweep purges expired counters.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// One counter and the absolute expiry of its window.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    window_expires: u64,
}

/// Counter store backed by an in-process concurrent map.
///
/// Suitable for a single instance only: counters live in this process and are
/// not visible to others. The increment path performs its read-modify-write
/// entirely under the map entry's shard guard, with no await point, so
/// concurrent callers on the same key are strictly serialized.
///
/// A background sweep bounds memory growth by purging expired entries. The
/// store must be constructed inside a Tokio runtime; the sweep task is stopped
/// by [`close`](CounterStore::close) and aborted on drop as a backstop.
pub struct MemoryStore {
    entries: Arc<DashMap<String, CounterEntry>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Create a new store with the default sweep interval.
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a new store sweeping expired counters every `interval`.
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let entries: Arc<DashMap<String, CounterEntry>> = Arc::new(DashMap::new());

        let sweep_entries = Arc::clone(&entries);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = clock::now_millis();
                let before = sweep_entries.len();
                sweep_entries.retain(|_, entry| entry.window_expires > now);
                let purged = before - sweep_entries.len();
                if purged > 0 {
                    trace!(purged, "Purged expired rate limit counters");
                }
            }
        });

        Self {
            entries,
            sweep: Mutex::new(Some(handle)),
        }
    }

    /// Number of counters currently held, live or not yet swept.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn force_expire(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.window_expires = clock::now_millis().saturating_sub(1);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<IncrementOutcome> {
        let now = clock::now_millis();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                window_expires: now + ttl_secs * 1000,
            });

        if entry.window_expires <= now {
            // The previous window elapsed without being swept yet.
            entry.count = 1;
            entry.window_expires = now + ttl_secs * 1000;
        } else {
            entry.count += 1;
        }

        Ok(IncrementOutcome {
            count: entry.count,
            window_expires: entry.window_expires,
        })
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let now = clock::now_millis();
        Ok(match self.entries.get(key) {
            Some(entry) if entry.window_expires > now => (entry.window_expires - now) as i64,
            _ => -1,
        })
    }

    async fn count(&self, key: &str) -> Result<u64> {
        let now = clock::now_millis();
        Ok(match self.entries.get(key) {
            Some(entry) if entry.window_expires > now => entry.count,
            _ => 0,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
            debug!("Memory store sweep task stopped");
        }
        Ok(())
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_first_increment_creates_counter() {
        let store = MemoryStore::new();
        let before = clock::now_millis();

        let outcome = store.increment("a", 60).await.unwrap();

        assert_eq!(outcome.count, 1);
        assert!(outcome.window_expires >= before + 60_000);
        assert!(outcome.window_expires <= clock::now_millis() + 60_000);
    }

    #[tokio::test]
    async fn test_increment_keeps_existing_expiry() {
        let store = MemoryStore::new();

        let first = store.increment("a", 60).await.unwrap();
        let second = store.increment("a", 60).await.unwrap();
        let third = store.increment("a", 60).await.unwrap();

        assert_eq!(second.count, 2);
        assert_eq!(third.count, 3);
        assert_eq!(second.window_expires, first.window_expires);
        assert_eq!(third.window_expires, first.window_expires);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_share_state() {
        let store = MemoryStore::new();

        store.increment("a", 60).await.unwrap();
        store.increment("a", 60).await.unwrap();
        let b = store.increment("b", 60).await.unwrap();

        assert_eq!(b.count, 1);
        assert_eq!(store.count("a").await.unwrap(), 2);
        assert_eq!(store.count("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ttl_absent_key_is_negative() {
        let store = MemoryStore::new();
        assert_eq!(store.ttl("never").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_ttl_after_increment_is_bounded() {
        let store = MemoryStore::new();
        store.increment("a", 30).await.unwrap();

        let ttl = store.ttl("a").await.unwrap();
        assert!(ttl > 0);
        assert!(ttl <= 30_000);
    }

    #[tokio::test]
    async fn test_ttl_does_not_mutate_count() {
        let store = MemoryStore::new();
        store.increment("a", 60).await.unwrap();

        store.ttl("a").await.unwrap();
        store.ttl("a").await.unwrap();

        assert_eq!(store.count("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_count_on_absent_key_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.count("never").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_then_increment_resets() {
        let store = MemoryStore::new();
        store.increment("a", 60).await.unwrap();
        store.increment("a", 60).await.unwrap();

        store.delete("a").await.unwrap();
        let outcome = store.increment("a", 60).await.unwrap();

        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn test_expired_counter_rolls_over() {
        let store = MemoryStore::new();
        store.increment("a", 60).await.unwrap();
        store.increment("a", 60).await.unwrap();
        store.force_expire("a");

        assert_eq!(store.ttl("a").await.unwrap(), -1);
        assert_eq!(store.count("a").await.unwrap(), 0);

        let outcome = store.increment("a", 60).await.unwrap();
        assert_eq!(outcome.count, 1);
        assert!(outcome.window_expires > clock::now_millis());
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_entries() {
        let store = MemoryStore::with_sweep_interval(Duration::from_millis(20));
        store.increment("stale", 60).await.unwrap();
        store.increment("live", 60).await.unwrap();
        store.force_expire("stale");

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.entry_count(), 1);
        assert_eq!(store.count("live").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = MemoryStore::new();
        store.increment("a", 60).await.unwrap();

        assert_ok!(store.close().await);
        assert_ok!(store.close().await);

        // Counters remain usable after the sweep stops.
        assert_eq!(store.count("a").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    store.increment("shared", 60).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count("shared").await.unwrap(), 400);
    }
}
