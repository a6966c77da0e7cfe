//! Queue names and cache keys shared by the placement path and the worker.

use std::time::Duration;

use common::BuyerId;

/// Queue carrying `OrderPlaced` events.
pub const ORDER_PLACED_QUEUE: &str = "order-placed";

/// Prefix of the per-buyer order list cache key.
pub const USER_ORDERS_KEY_PREFIX: &str = "user_orders_";

/// Default lifetime of a cached order list.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Returns the cache key holding a buyer's order list.
pub fn user_orders_key(buyer_id: &BuyerId) -> String {
    format!("{USER_ORDERS_KEY_PREFIX}{buyer_id}")
}
