use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Key-value store with atomic counters and TTLs, shared by every worker.
///
/// The in-process implementation below is the default; a Redis-backed one
/// (`REDIS_URL`) satisfies the same contract for multi-node deployments.
/// Acquire paths fail closed when the store errors.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    async fn set_i64(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    /// Atomic pipeline used by token acquisition: increment `counter_key`
    /// (refreshing its TTL) and write `stamp_key = stamp` in one step.
    async fn incr_and_stamp(
        &self,
        counter_key: &str,
        counter_ttl: Duration,
        stamp_key: &str,
        stamp: i64,
        stamp_ttl: Duration,
    ) -> Result<i64>;

    /// Decrement a counter, clamping at zero.
    async fn decr_min_zero(&self, key: &str) -> Result<i64>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Sliding-window membership: drop entries older than `window_ms`,
    /// insert `now_ms`, and return the post-insert count.
    async fn window_add_and_count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

/// Single-process coordination store. One mutex over the whole keyspace
/// keeps the pipeline operations atomic; contention is negligible next to
/// network time.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
    windows: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn set_i64(&self, key: &str, value: i64, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn incr_and_stamp(
        &self,
        counter_key: &str,
        counter_ttl: Duration,
        stamp_key: &str,
        stamp: i64,
        stamp_ttl: Duration,
    ) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let current = match entries.get(counter_key) {
            Some(entry) if !entry.expired() => entry.value,
            _ => 0,
        };
        let next = current + 1;
        entries.insert(
            counter_key.to_string(),
            Entry {
                value: next,
                expires_at: Some(Instant::now() + counter_ttl),
            },
        );
        entries.insert(
            stamp_key.to_string(),
            Entry {
                value: stamp,
                expires_at: Some(Instant::now() + stamp_ttl),
            },
        );
        Ok(next)
    }

    async fn decr_min_zero(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let next = match entries.get(key) {
            Some(entry) if !entry.expired() => (entry.value - 1).max(0),
            _ => 0,
        };
        if let Some(entry) = entries.get_mut(key) {
            entry.value = next;
        } else {
            entries.insert(
                key.to_string(),
                Entry {
                    value: next,
                    expires_at: None,
                },
            );
        }
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn window_add_and_count(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<usize> {
        let mut windows = self.windows.lock().await;
        let window = windows.entry(key.to_string()).or_default();
        let cutoff = now_ms - window_ms;
        while window.front().map(|&t| t < cutoff).unwrap_or(false) {
            window.pop_front();
        }
        window.push_back(now_ms);
        Ok(window.len())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
