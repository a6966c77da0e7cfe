//! Order record, status state machine and related types.

mod commands;
mod events;
mod record;
mod state;
mod value_objects;

pub use commands::PlaceOrder;
pub use events::OrderPlaced;
pub use record::{Order, OrderParts, Transition};
pub use state::OrderStatus;
pub use value_objects::{Money, PaymentMethod};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Buyer reference is required.
    #[error("Buyer reference is required")]
    BuyerRequired,

    /// Product reference is required.
    #[error("Product reference is required")]
    ProductRequired,

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be at least 1)")]
    InvalidQuantity { quantity: i64 },

    /// Invalid unit price.
    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: Money },
}
