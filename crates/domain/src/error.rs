//! Domain error types.

use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the order rules.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// An event payload could not be decoded or violates the wire contract.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// A stored value could not be mapped back to a domain value.
    #[error("Invalid stored value for {field}: {value}")]
    InvalidStoredValue { field: &'static str, value: String },
}
