//! Persistence for the order pipeline.
//!
//! - [`StockLedger`]: atomic stock reservation
//! - [`OrderStore`]: order reads and monotonic status transitions
//! - [`OutboxStore`]: undelivered `OrderPlaced` events awaiting publication
//! - [`PlacementStore`]: reserve + insert order + record outbox entry as one unit of work
//!
//! Two implementations are provided: [`InMemoryStore`] for tests and demo
//! mode, and [`PostgresStore`] for production.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use error::{Result, StorageError};
pub use memory::InMemoryStore;
pub use outbox::OutboxEntry;
pub use postgres::PostgresStore;
pub use store::{
    AccountDirectory, OrderStore, OutboxStore, Placement, PlacementStore, StockLedger,
    StockReservation,
};
