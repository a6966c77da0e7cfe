//! Commands accepted by the order pipeline.

use common::{BuyerId, CorrelationId, ProductId};
use serde::{Deserialize, Serialize};

use super::{OrderError, PaymentMethod};

/// Command to place a single-product order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub buyer_id: BuyerId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub payment_method: PaymentMethod,
    pub correlation_id: CorrelationId,
}

impl PlaceOrder {
    /// Creates a new place-order command with a fresh correlation ID.
    pub fn new(
        buyer_id: impl Into<BuyerId>,
        product_id: impl Into<ProductId>,
        quantity: i64,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            product_id: product_id.into(),
            quantity,
            payment_method,
            correlation_id: CorrelationId::generate(),
        }
    }

    /// Sets the correlation ID propagated from the caller.
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Checks that the required references are present.
    pub fn validate_references(&self) -> Result<(), OrderError> {
        if self.buyer_id.is_blank() {
            return Err(OrderError::BuyerRequired);
        }
        if self.product_id.is_blank() {
            return Err(OrderError::ProductRequired);
        }
        Ok(())
    }

    /// Returns the quantity as a positive count.
    pub fn validated_quantity(&self) -> Result<u32, OrderError> {
        u32::try_from(self.quantity)
            .ok()
            .filter(|q| *q >= 1)
            .ok_or(OrderError::InvalidQuantity {
                quantity: self.quantity,
            })
    }
}
