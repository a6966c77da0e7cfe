//! Pipeline error types.

use channel::ChannelError;
use common::{BuyerId, ProductId};
use domain::OrderError;
use storage::StorageError;
use thiserror::Error;

/// Reasons an order placement is refused or fails.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The request itself is invalid.
    #[error(transparent)]
    Validation(#[from] OrderError),

    /// No active account matches the buyer reference.
    #[error("Buyer not found: {0}")]
    BuyerNotFound(BuyerId),

    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The product is not for sale.
    #[error("Product is not available: {0}")]
    ProductInactive(ProductId),

    /// Not enough stock to cover the requested quantity.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The store failed; nothing was persisted.
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl PlacementError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlacementError::Validation(_) => "validation",
            PlacementError::BuyerNotFound(_) => "buyer_not_found",
            PlacementError::ProductNotFound(_) => "product_not_found",
            PlacementError::ProductInactive(_) => "product_inactive",
            PlacementError::InsufficientStock { .. } => "insufficient_stock",
            PlacementError::Storage(_) => "storage",
        }
    }
}

impl From<StorageError> for PlacementError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ProductNotFound(id) => PlacementError::ProductNotFound(id),
            StorageError::ProductInactive(id) => PlacementError::ProductInactive(id),
            StorageError::InsufficientStock {
                product_id,
                requested,
                available,
            } => PlacementError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            StorageError::Order(e) => PlacementError::Validation(e),
            other => PlacementError::Storage(other),
        }
    }
}

/// Errors raised while moving an outbox entry onto the channel.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while the worker settles a delivery.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
