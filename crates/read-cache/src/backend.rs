use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// Key/value store with per-entry expiry.
///
/// Implementations may lose entries at any time; callers treat every
/// failure as a miss.
///
/// Every key also carries a generation counter that [`remove`] bumps.
/// A reader that captured the generation before loading a value can store it
/// with [`set_if_generation`], which refuses the write once the key has been
/// invalidated in between.
///
/// [`remove`]: CacheBackend::remove
/// [`set_if_generation`]: CacheBackend::set_if_generation
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the value for `key` unless it is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Removes `key` and bumps its generation. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Returns the current generation of `key`, zero if it was never removed.
    async fn generation(&self, key: &str) -> Result<u64>;

    /// Stores `value` only if `key` is still at `generation`.
    ///
    /// Returns false when a removal happened since the generation was read.
    async fn set_if_generation(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool>;
}
