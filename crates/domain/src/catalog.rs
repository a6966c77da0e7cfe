//! Catalog and account records consulted when an order is placed.

use common::{BuyerId, ProductId, RecordStamp};
use serde::{Deserialize, Serialize};

use crate::order::Money;

/// Inventory view of a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub stock: u32,
    pub active: bool,
    #[serde(flatten)]
    pub stamp: RecordStamp,
}

impl Product {
    /// Creates an active product.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        unit_price: Money,
        stock: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unit_price,
            stock,
            active: true,
            stamp: RecordStamp::new(),
        }
    }

    /// Marks the product inactive.
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Returns true if `quantity` units can be reserved right now.
    pub fn can_reserve(&self, quantity: u32) -> bool {
        self.active && self.stock >= quantity
    }
}

/// A buyer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: BuyerId,
    pub username: String,
    pub active: bool,
    #[serde(flatten)]
    pub stamp: RecordStamp,
}

impl Account {
    /// Creates an active account.
    pub fn new(id: impl Into<BuyerId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            active: true,
            stamp: RecordStamp::new(),
        }
    }
}
