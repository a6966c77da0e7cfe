use std::time::Duration;

use async_trait::async_trait;
use common::{BuyerId, OrderId, ProductId};
use domain::{Account, Money, Order, OrderStatus, PlaceOrder, Product, Transition};
use uuid::Uuid;

use crate::{OutboxEntry, Result};

/// Successful stock reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockReservation {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Unit price read in the same atomic step as the decrement.
    pub unit_price: Money,
    /// Stock left after the decrement.
    pub remaining: u32,
}

/// Result of a committed placement.
#[derive(Debug, Clone)]
pub struct Placement {
    pub order: Order,
    pub outbox: OutboxEntry,
    pub remaining_stock: u32,
}

/// Finite product stock with an atomic check-and-decrement.
///
/// Two concurrent reservations whose combined quantity exceeds the available
/// stock never both succeed, and stock never goes negative.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Decrements stock by `quantity` if at least that much is available.
    ///
    /// Fails with `ProductNotFound`, `ProductInactive` or `InsufficientStock`
    /// without changing anything.
    async fn reserve_stock(&self, product_id: &ProductId, quantity: u32)
    -> Result<StockReservation>;

    /// Reads the current product record.
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>>;
}

/// Durable order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Reads a single order.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns every order of a buyer, newest first.
    async fn orders_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Order>>;

    /// Moves an order towards `target` under a row-level lock.
    ///
    /// A request that is not a forward move is reported as
    /// [`Transition::Unchanged`] and nothing is written.
    async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        note: Option<String>,
    ) -> Result<(Order, Transition)>;
}

/// Read-only view of buyer accounts.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, buyer_id: &BuyerId) -> Result<Option<Account>>;
}

/// Undelivered outbox entries.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns up to `limit` undelivered entries, oldest first.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Marks an entry as handed to the channel.
    async fn mark_delivered(&self, entry_id: Uuid) -> Result<()>;

    /// Records a failed publication attempt.
    async fn record_failure(&self, entry_id: Uuid, error: &str) -> Result<()>;

    /// Deletes entries delivered at least `retention` ago and returns how
    /// many were removed. Pending entries are never touched.
    async fn prune_delivered(&self, retention: Duration) -> Result<u64>;
}

/// Everything the placement path needs, plus the single unit of work that
/// ties stock, order and outbox together.
#[async_trait]
pub trait PlacementStore: StockLedger + OrderStore + AccountDirectory + OutboxStore {
    /// Reserves stock, inserts the `Pending` order and records its
    /// `OrderPlaced` outbox entry in one transaction.
    ///
    /// On any failure nothing is persisted.
    async fn commit_placement(&self, cmd: &PlaceOrder) -> Result<Placement>;
}
