use domain::Order;
use serde::{Deserialize, Serialize};

/// A buyer's orders, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderList {
    pub orders: Vec<Order>,
    pub total_count: usize,
}

impl OrderList {
    pub fn new(orders: Vec<Order>) -> Self {
        let total_count = orders.len();
        Self {
            orders,
            total_count,
        }
    }
}
