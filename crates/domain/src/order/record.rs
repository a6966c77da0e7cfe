//! The order record and its transition rules.

use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, ProductId, RecordStamp};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderStatus, PaymentMethod, PlaceOrder};

/// A placed order.
///
/// Fields are private: a store rebuilds an order through [`Order::from_parts`]
/// and changes its status only through [`Order::transition_to`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    buyer_id: BuyerId,
    product_id: ProductId,
    quantity: u32,
    payment_method: PaymentMethod,
    status: OrderStatus,
    total_amount: Money,
    #[serde(flatten)]
    stamp: RecordStamp,
    processed_at: Option<DateTime<Utc>>,
    processing_note: Option<String>,
}

/// Raw order fields, as read back from storage.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub buyer_id: BuyerId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub payment_method: PaymentMethod,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub stamp: RecordStamp,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_note: Option<String>,
}

/// Outcome of a status change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The order moved from one status to a later one.
    Applied { from: OrderStatus, to: OrderStatus },
    /// The request was not a forward move; the order keeps its status.
    Unchanged { current: OrderStatus },
}

impl Transition {
    /// Returns true if the status actually changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// Returns the status the order has after the request.
    pub fn status(&self) -> OrderStatus {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Unchanged { current } => *current,
        }
    }
}

impl Order {
    /// Creates a new pending order for a reserved quantity at the given unit price.
    ///
    /// The total is computed here once and never recomputed.
    pub fn place(
        cmd: &PlaceOrder,
        unit_price: Money,
        at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        cmd.validate_references()?;
        let quantity = cmd.validated_quantity()?;
        if !unit_price.is_positive() {
            return Err(OrderError::InvalidPrice { price: unit_price });
        }

        Ok(Self {
            id: OrderId::new(),
            buyer_id: cmd.buyer_id.clone(),
            product_id: cmd.product_id.clone(),
            quantity,
            payment_method: cmd.payment_method,
            status: OrderStatus::Pending,
            total_amount: unit_price.multiply(quantity),
            stamp: RecordStamp::created_at(at),
            processed_at: None,
            processing_note: None,
        })
    }

    /// Rebuilds an order from stored fields.
    pub fn from_parts(parts: OrderParts) -> Self {
        Self {
            id: parts.id,
            buyer_id: parts.buyer_id,
            product_id: parts.product_id,
            quantity: parts.quantity,
            payment_method: parts.payment_method,
            status: parts.status,
            total_amount: parts.total_amount,
            stamp: parts.stamp,
            processed_at: parts.processed_at,
            processing_note: parts.processing_note,
        }
    }

    /// Moves the order to `target` if that is a forward move.
    ///
    /// Anything else (terminal source, same status, backwards) leaves the
    /// order untouched and reports its current status.
    pub fn transition_to(
        &mut self,
        target: OrderStatus,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Transition {
        if !self.status.can_transition_to(target) {
            return Transition::Unchanged {
                current: self.status,
            };
        }

        let from = self.status;
        self.status = target;
        if target.stamps_processed_at() {
            self.processed_at = Some(at);
        }
        if note.is_some() {
            self.processing_note = note;
        }
        self.stamp.touch(at);

        Transition::Applied { from, to: target }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn buyer_id(&self) -> &BuyerId {
        &self.buyer_id
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.stamp.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.stamp.updated_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn processing_note(&self) -> Option<&str> {
        self.processing_note.as_deref()
    }
}
