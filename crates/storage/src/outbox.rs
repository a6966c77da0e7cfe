use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{OrderPlaced, keys::ORDER_PLACED_QUEUE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

/// An event recorded in the same transaction as the order it describes,
/// waiting to be published to its queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Unique ID, reused as the message ID on the channel.
    pub id: Uuid,
    pub order_id: OrderId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Number of failed publication attempts.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    /// Creates an undelivered entry for an `OrderPlaced` event.
    pub fn order_placed(event: &OrderPlaced) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            order_id: event.order_id,
            queue: ORDER_PLACED_QUEUE.to_string(),
            payload: serde_json::to_value(event)?,
            created_at: event.created_at,
            attempts: 0,
            last_error: None,
            delivered_at: None,
        })
    }

    /// Returns the payload as the bytes published on the channel.
    pub fn payload_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.payload)?)
    }

    /// Returns true once the entry has been handed to the channel.
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationId, stamp::now};
    use domain::{Order, PaymentMethod, PlaceOrder};

    #[test]
    fn test_order_placed_entry_targets_order_placed_queue() {
        let cmd = PlaceOrder::new("B1", "P1", 2, PaymentMethod::Card);
        let order = Order::place(&cmd, "19.99".parse().unwrap(), now()).unwrap();
        let event = OrderPlaced::from_order(&order, CorrelationId::new("c-1"));

        let entry = OutboxEntry::order_placed(&event).unwrap();
        assert_eq!(entry.queue, "order-placed");
        assert_eq!(entry.order_id, order.id());
        assert!(!entry.is_delivered());

        let decoded = OrderPlaced::decode(&entry.payload_bytes().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }
}
