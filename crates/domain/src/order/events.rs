//! The event published once per placed order.

use chrono::{DateTime, Utc};
use common::{BuyerId, CorrelationId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use super::{Money, Order};
use crate::error::DomainError;

/// Notification that an order was placed and its stock reserved.
///
/// Immutable once published. Consumers must tolerate receiving the same
/// event more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub buyer_ref: BuyerId,
    pub product_ref: ProductId,
    pub quantity: u32,
    pub total_amount: Money,
    pub created_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
}

impl OrderPlaced {
    /// Builds the event for a freshly placed order.
    pub fn from_order(order: &Order, correlation_id: CorrelationId) -> Self {
        Self {
            order_id: order.id(),
            buyer_ref: order.buyer_id().clone(),
            product_ref: order.product_id().clone(),
            quantity: order.quantity(),
            total_amount: order.total_amount(),
            created_at: order.created_at(),
            correlation_id,
        }
    }

    /// Serializes the event to its JSON wire form.
    pub fn to_json(&self) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(self).map_err(|e| DomainError::MalformedEvent(e.to_string()))
    }

    /// Decodes an event from raw payload bytes.
    ///
    /// Fails for payloads that are not valid JSON, miss a field, or carry a
    /// zero quantity.
    pub fn decode(payload: &[u8]) -> Result<Self, DomainError> {
        let event: OrderPlaced = serde_json::from_slice(payload)
            .map_err(|e| DomainError::MalformedEvent(e.to_string()))?;
        if event.quantity == 0 {
            return Err(DomainError::MalformedEvent(
                "quantity must be at least 1".to_string(),
            ));
        }
        if event.buyer_ref.is_blank() {
            return Err(DomainError::MalformedEvent(
                "buyerRef must not be blank".to_string(),
            ));
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{PaymentMethod, PlaceOrder};
    use common::stamp::now;

    fn placed() -> OrderPlaced {
        let cmd = PlaceOrder::new("B1", "P1", 2, PaymentMethod::Card)
            .with_correlation_id(CorrelationId::new("req-1"));
        let order = Order::place(&cmd, "19.99".parse().unwrap(), now()).unwrap();
        OrderPlaced::from_order(&order, cmd.correlation_id)
    }

    #[test]
    fn test_wire_field_names() {
        let json = placed().to_json().unwrap();
        let obj = json.as_object().unwrap();
        for field in [
            "orderId",
            "buyerRef",
            "productRef",
            "quantity",
            "totalAmount",
            "createdAt",
            "correlationId",
        ] {
            assert!(obj.contains_key(field), "missing {field}");
        }
        assert_eq!(obj.len(), 7);
        assert_eq!(json["totalAmount"], "39.98");
        assert_eq!(json["correlationId"], "req-1");
    }

    #[test]
    fn test_roundtrip_preserves_every_field() {
        let event = placed();
        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded = OrderPlaced::decode(&bytes).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.total_amount.to_string(), "39.98");
    }

    #[test]
    fn test_decode_accepts_numeric_amount() {
        let payload = br#"{
            "orderId": "6f1c1f1e-9a43-4c41-9e8e-1b8a51b0a3d2",
            "buyerRef": "B1",
            "productRef": "P1",
            "quantity": 2,
            "totalAmount": 40,
            "createdAt": "2024-05-01T12:00:00Z",
            "correlationId": "abc"
        }"#;
        let event = OrderPlaced::decode(payload).unwrap();
        assert_eq!(event.total_amount.to_string(), "40.00");
        assert_eq!(event.quantity, 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            OrderPlaced::decode(b"not json"),
            Err(DomainError::MalformedEvent(_))
        ));
        assert!(matches!(
            OrderPlaced::decode(br#"{"orderId":"6f1c1f1e-9a43-4c41-9e8e-1b8a51b0a3d2"}"#),
            Err(DomainError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_decode_rejects_zero_quantity() {
        let mut json = placed().to_json().unwrap();
        json["quantity"] = serde_json::json!(0);
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(OrderPlaced::decode(&bytes).is_err());
    }
}
