//! Domain layer for the order pipeline.
//!
//! This crate provides the core domain types:
//! - `Order` with its status state machine
//! - `Product` and `Account`, the records an order placement is validated against
//! - `OrderPlaced`, the event published for every new order
//! - `Money` and `PaymentMethod` value objects

pub mod catalog;
pub mod error;
pub mod keys;
pub mod order;

pub use catalog::{Account, Product};
pub use error::DomainError;
pub use order::{
    Money, Order, OrderError, OrderParts, OrderPlaced, OrderStatus, PaymentMethod, PlaceOrder,
    Transition,
};
