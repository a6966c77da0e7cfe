//! Order fulfillment pipeline.
//!
//! The pipeline runs in three stages:
//! 1. [`PlacementService`] reserves stock and commits the order together with
//!    its `OrderPlaced` outbox entry
//! 2. [`OutboxRelay`] publishes undelivered outbox entries to the channel
//! 3. [`FulfillmentWorker`] consumes `OrderPlaced` events and moves each order
//!    to its fulfilled status exactly once, however often the event arrives

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod placement;
pub mod relay;
pub mod worker;

pub use config::{BackendConfig, RelayConfig, WorkerConfig};
pub use error::{PlacementError, RelayError, WorkerError};
pub use placement::PlacementService;
pub use relay::{OutboxRelay, deliver_entry};
pub use worker::{FulfillmentWorker, HandleOutcome};
