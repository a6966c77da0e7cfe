//! Read side of the order pipeline.
//!
//! - [`CacheBackend`]: key/value store with per-entry expiry
//! - [`InMemoryCache`] and [`PostgresCache`] backends
//! - [`OrderHistoryCache`]: cache-aside view of a buyer's orders, invalidated
//!   by every writer that changes one of them

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod view;

pub use backend::CacheBackend;
pub use coordinator::{InvalidationPolicy, OrderHistoryCache};
pub use error::{CacheError, Result};
pub use memory::InMemoryCache;
pub use postgres::PostgresCache;
pub use view::OrderList;
