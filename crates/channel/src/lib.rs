//! Message channel with at-least-once delivery.
//!
//! Consumers pull deliveries with an explicit [`EventChannel::receive`] call
//! and settle each one with `ack`, `nack` or `dead_letter`. A delivery that
//! is never settled is redelivered.

pub mod error;
pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

pub use error::{ChannelError, Result};
pub use memory::{DeadLetter, InMemoryChannel};
pub use postgres::PostgresChannel;

/// A message handed to a consumer, pending settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identifies this lease; used to settle it.
    pub delivery_id: i64,
    pub queue: String,
    /// Publisher-assigned ID, stable across redeliveries.
    pub message_id: Uuid,
    pub payload: Vec<u8>,
    /// How many times the message has been handed out, this one included.
    pub attempts: u32,
}

/// Durable queue abstraction shared by publishers and consumers.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Appends a message to `queue`.
    async fn publish(&self, queue: &str, message_id: Uuid, payload: &[u8]) -> Result<()>;

    /// Waits up to `wait` for the next message on `queue`.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>>;

    /// Removes a processed message.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Returns a message to the queue for redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Moves a message that can never be processed out of the queue.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()>;
}
