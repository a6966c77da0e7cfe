use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{CacheBackend, CacheError, Result};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    generations: HashMap<String, u64>,
}

/// In-process cache backend.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
    failing_removes: Arc<AtomicU32>,
}

impl InMemoryCache {
    /// Creates a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail, simulating a cache outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` removals fail.
    pub fn fail_next_removes(&self, count: u32) {
        self.failing_removes.store(count, Ordering::SeqCst);
    }

    /// Returns true if `key` holds a live entry.
    pub async fn contains(&self, key: &str) -> bool {
        self.state
            .read()
            .await
            .entries
            .get(key)
            .is_some_and(|e| e.expires_at > Instant::now())
    }

    /// Stores a raw value, bypassing availability checks.
    pub async fn insert_raw(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.state.write().await.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("simulated cache outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.insert_raw(key, value, ttl).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        let failing = self
            .failing_removes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(CacheError::Unavailable("simulated remove failure".to_string()));
        }
        let mut state = self.state.write().await;
        state.entries.remove(key);
        *state.generations.entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn generation(&self, key: &str) -> Result<u64> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .generations
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    async fn set_if_generation(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.generations.get(key).copied().unwrap_or(0) != generation {
            return Ok(false);
        }
        state.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let cache = InMemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.remove("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set("k", b"v".to_vec(), Duration::from_secs(120))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(cache.contains("k").await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_bumps_generation() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.generation("k").await.unwrap(), 0);

        cache.remove("k").await.unwrap();
        cache.remove("k").await.unwrap();
        assert_eq!(cache.generation("k").await.unwrap(), 2);
        assert_eq!(cache.generation("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_if_generation_refuses_stale_writes() {
        let cache = InMemoryCache::new();
        let seen = cache.generation("k").await.unwrap();
        cache.remove("k").await.unwrap();

        let stored = cache
            .set_if_generation("k", b"stale".to_vec(), Duration::from_secs(60), seen)
            .await
            .unwrap();
        assert!(!stored);
        assert!(!cache.contains("k").await);

        let current = cache.generation("k").await.unwrap();
        let stored = cache
            .set_if_generation("k", b"fresh".to_vec(), Duration::from_secs(60), current)
            .await
            .unwrap();
        assert!(stored);
        assert_eq!(cache.get("k").await.unwrap(), Some(b"fresh".to_vec()));
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_generation() {
        let cache = InMemoryCache::new();
        cache.fail_next_removes(1);
        assert!(cache.remove("k").await.is_err());
        assert_eq!(cache.generation("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let cache = InMemoryCache::new();
        cache.set_unavailable(true);
        assert!(cache.get("k").await.is_err());
        assert!(cache.set("k", Vec::new(), Duration::from_secs(1)).await.is_err());
        assert!(cache.remove("k").await.is_err());
        assert!(cache.generation("k").await.is_err());
    }

    #[tokio::test]
    async fn test_fail_next_removes() {
        let cache = InMemoryCache::new();
        cache.fail_next_removes(2);
        assert!(cache.remove("k").await.is_err());
        assert!(cache.remove("k").await.is_err());
        assert!(cache.remove("k").await.is_ok());
    }
}
