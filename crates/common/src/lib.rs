//! Identifiers and small value types shared by every crate in the workspace.

pub mod stamp;
pub mod types;

pub use stamp::RecordStamp;
pub use types::{BuyerId, CorrelationId, OrderId, ProductId};
