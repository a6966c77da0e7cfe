use common::{OrderId, ProductId};
use domain::{DomainError, OrderError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Not enough stock left to cover the requested quantity.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The product exists but is not available for sale.
    #[error("Product is inactive: {0}")]
    ProductInactive(ProductId),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The outbox entry does not exist.
    #[error("Outbox entry not found: {0}")]
    OutboxEntryNotFound(Uuid),

    /// The order violated a domain rule.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A domain value could not be built from stored data.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The store is temporarily unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Returns true for failures that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Database(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Unavailable("down".into()).is_transient());
        assert!(StorageError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StorageError::ProductNotFound(ProductId::new("P1")).is_transient());
        assert!(
            !StorageError::InsufficientStock {
                product_id: ProductId::new("P1"),
                requested: 3,
                available: 2,
            }
            .is_transient()
        );
    }
}
