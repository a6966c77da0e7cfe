//! Cache-aside coordinator for buyer order history.

use std::sync::Arc;
use std::time::Duration;

use common::BuyerId;
use domain::keys::{DEFAULT_CACHE_TTL, user_orders_key};
use storage::OrderStore;

use crate::{CacheBackend, OrderList, Result};

/// Retry schedule for cache invalidation.
#[derive(Debug, Clone, Copy)]
pub struct InvalidationPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub initial_backoff: Duration,
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// Serves a buyer's order list from the cache, falling back to the store.
///
/// Cache failures never fail a read: they degrade to a miss. The store stays
/// the source of truth, so any entry can be dropped at any time.
///
/// A miss only populates the cache if no invalidation of the key landed
/// while the store was being read.
pub struct OrderHistoryCache<S: OrderStore> {
    store: Arc<S>,
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    policy: InvalidationPolicy,
}

impl<S: OrderStore> Clone for OrderHistoryCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
            ttl: self.ttl,
            policy: self.policy,
        }
    }
}

impl<S: OrderStore> OrderHistoryCache<S> {
    /// Creates a coordinator with the default TTL and invalidation policy.
    pub fn new(store: Arc<S>, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            store,
            backend,
            ttl: DEFAULT_CACHE_TTL,
            policy: InvalidationPolicy::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_policy(mut self, policy: InvalidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the buyer's orders, newest first.
    ///
    /// Only a store failure is reported as an error.
    #[tracing::instrument(skip(self, buyer_id), fields(buyer_id = %buyer_id))]
    pub async fn get_orders_for_buyer(&self, buyer_id: &BuyerId) -> Result<OrderList> {
        let key = user_orders_key(buyer_id);

        match self.backend.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<OrderList>(&bytes) {
                Ok(list) => {
                    metrics::counter!("read_cache_hits_total").increment(1);
                    return Ok(list);
                }
                Err(e) => {
                    tracing::warn!(%key, error = %e, "evicting undecodable cache entry");
                    if let Err(e) = self.backend.remove(&key).await {
                        tracing::warn!(%key, error = %e, "failed to evict cache entry");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                metrics::counter!("read_cache_errors_total").increment(1);
                tracing::warn!(%key, error = %e, "cache read failed, reading from store");
            }
        }

        metrics::counter!("read_cache_misses_total").increment(1);
        // Captured before the store read so an invalidation racing with it
        // makes the populate below a no-op.
        let generation = match self.backend.generation(&key).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                metrics::counter!("read_cache_errors_total").increment(1);
                tracing::warn!(%key, error = %e, "cache generation unavailable, not populating");
                None
            }
        };
        let list = OrderList::new(self.store.orders_for_buyer(buyer_id).await?);

        if let Some(generation) = generation {
            self.populate(&key, &list, generation).await;
        }

        Ok(list)
    }

    async fn populate(&self, key: &str, list: &OrderList, generation: u64) {
        let bytes = match serde_json::to_vec(list) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%key, error = %e, "failed to encode order list");
                return;
            }
        };
        match self
            .backend
            .set_if_generation(key, bytes, self.ttl, generation)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                metrics::counter!("read_cache_stale_populates_total").increment(1);
                tracing::debug!(%key, generation, "invalidated during read, not populating");
            }
            Err(e) => {
                metrics::counter!("read_cache_errors_total").increment(1);
                tracing::warn!(%key, error = %e, "failed to populate cache");
            }
        }
    }

    /// Drops the buyer's cached order list.
    ///
    /// Retries with exponential backoff and never fails the caller. Returns
    /// false if every attempt failed; the stale entry then lives until its
    /// TTL runs out.
    #[tracing::instrument(skip(self, buyer_id), fields(buyer_id = %buyer_id))]
    pub async fn invalidate(&self, buyer_id: &BuyerId) -> bool {
        let key = user_orders_key(buyer_id);
        let mut backoff = self.policy.initial_backoff;

        for attempt in 0..=self.policy.retries {
            match self.backend.remove(&key).await {
                Ok(()) => return true,
                Err(e) if attempt < self.policy.retries => {
                    tracing::debug!(%key, attempt, error = %e, "cache invalidation failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    metrics::counter!("read_cache_invalidation_failures_total").increment(1);
                    tracing::warn!(%key, error = %e, "cache invalidation gave up");
                }
            }
        }
        false
    }
}
