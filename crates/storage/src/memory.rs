use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use common::{BuyerId, OrderId, ProductId, stamp::now};
use domain::{Account, Order, OrderPlaced, OrderStatus, PlaceOrder, Product, Transition};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    OutboxEntry, Result, StorageError,
    store::{
        AccountDirectory, OrderStore, OutboxStore, Placement, PlacementStore, StockLedger,
        StockReservation,
    },
};

#[derive(Default)]
struct State {
    accounts: HashMap<BuyerId, Account>,
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    outbox: Vec<OutboxEntry>,
}

impl State {
    /// Checks a reservation without applying it.
    fn reservation(&self, product_id: &ProductId, quantity: u32) -> Result<StockReservation> {
        let product = self
            .products
            .get(product_id)
            .ok_or_else(|| StorageError::ProductNotFound(product_id.clone()))?;
        if !product.active {
            return Err(StorageError::ProductInactive(product_id.clone()));
        }
        if product.stock < quantity {
            return Err(StorageError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available: product.stock,
            });
        }
        Ok(StockReservation {
            product_id: product_id.clone(),
            quantity,
            unit_price: product.unit_price,
            remaining: product.stock - quantity,
        })
    }

    fn apply(&mut self, reservation: &StockReservation) {
        if let Some(product) = self.products.get_mut(&reservation.product_id) {
            product.stock = reservation.remaining;
            product.stamp.touch(now());
        }
    }

    fn outbox_entry_mut(&mut self, entry_id: Uuid) -> Result<&mut OutboxEntry> {
        self.outbox
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or(StorageError::OutboxEntryNotFound(entry_id))
    }
}

/// In-memory store implementation for tests and demo mode.
///
/// All records live behind one lock, so a placement is atomic with respect
/// to every other operation on the same store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a buyer account.
    pub async fn add_account(&self, account: Account) {
        self.state
            .write()
            .await
            .accounts
            .insert(account.id.clone(), account);
    }

    /// Adds or replaces a product.
    pub async fn add_product(&self, product: Product) {
        self.state
            .write()
            .await
            .products
            .insert(product.id.clone(), product);
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, product_id: &ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(product_id)
            .map(|p| p.stock)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns every retained outbox entry, delivered or not, oldest first.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.read().await.outbox.clone()
    }

    /// Makes every write fail with `Unavailable`, simulating a database outage.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StockLedger for InMemoryStore {
    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockReservation> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let reservation = state.reservation(product_id, quantity)?;
        state.apply(&reservation);
        Ok(reservation)
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(product_id).cloned())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn orders_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.buyer_id() == buyer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then(b.id().cmp(&a.id()))
        });
        Ok(orders)
    }

    async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        note: Option<String>,
    ) -> Result<(Order, Transition)> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StorageError::OrderNotFound(order_id))?;
        let transition = order.transition_to(target, note, now());
        Ok((order.clone(), transition))
    }
}

#[async_trait]
impl AccountDirectory for InMemoryStore {
    async fn get_account(&self, buyer_id: &BuyerId) -> Result<Option<Account>> {
        Ok(self.state.read().await.accounts.get(buyer_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.is_delivered())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, entry_id: Uuid) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let entry = state.outbox_entry_mut(entry_id)?;
        if entry.delivered_at.is_none() {
            entry.delivered_at = Some(now());
        }
        Ok(())
    }

    async fn record_failure(&self, entry_id: Uuid, error: &str) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let entry = state.outbox_entry_mut(entry_id)?;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn prune_delivered(&self, retention: Duration) -> Result<u64> {
        self.check_writable()?;
        let Some(cutoff) = TimeDelta::from_std(retention)
            .ok()
            .and_then(|age| now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let mut state = self.state.write().await;
        let before = state.outbox.len();
        state
            .outbox
            .retain(|e| e.delivered_at.is_none_or(|at| at > cutoff));
        Ok((before - state.outbox.len()) as u64)
    }
}

#[async_trait]
impl PlacementStore for InMemoryStore {
    async fn commit_placement(&self, cmd: &PlaceOrder) -> Result<Placement> {
        let quantity = cmd.validated_quantity()?;
        self.check_writable()?;

        let mut state = self.state.write().await;
        let reservation = state.reservation(&cmd.product_id, quantity)?;
        let order = Order::place(cmd, reservation.unit_price, now())?;
        let event = OrderPlaced::from_order(&order, cmd.correlation_id.clone());
        let outbox = OutboxEntry::order_placed(&event)?;

        // Nothing is written until every fallible step above has succeeded.
        state.apply(&reservation);
        state.orders.insert(order.id(), order.clone());
        state.outbox.push(outbox.clone());

        Ok(Placement {
            order,
            outbox,
            remaining_stock: reservation.remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Money, PaymentMethod};

    async fn seeded(stock: u32) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.add_account(Account::new("B1", "buyer-one")).await;
        store
            .add_product(Product::new("P1", "Widget", Money::from_cents(1999), stock))
            .await;
        store
    }

    #[tokio::test]
    async fn test_reserve_decrements_stock() {
        let store = seeded(10).await;
        let reservation = store.reserve_stock(&"P1".into(), 2).await.unwrap();
        assert_eq!(reservation.remaining, 8);
        assert_eq!(reservation.unit_price, Money::from_cents(1999));
        assert_eq!(store.stock_of(&"P1".into()).await, Some(8));
    }

    #[tokio::test]
    async fn test_reserve_rejections_leave_stock_untouched() {
        let store = seeded(2).await;

        let result = store.reserve_stock(&"P1".into(), 3).await;
        assert!(matches!(
            result,
            Err(StorageError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            })
        ));

        let result = store.reserve_stock(&"P9".into(), 1).await;
        assert!(matches!(result, Err(StorageError::ProductNotFound(_))));

        store
            .add_product(Product::new("P2", "Gadget", Money::from_cents(500), 5).deactivated())
            .await;
        let result = store.reserve_stock(&"P2".into(), 1).await;
        assert!(matches!(result, Err(StorageError::ProductInactive(_))));

        assert_eq!(store.stock_of(&"P1".into()).await, Some(2));
        assert_eq!(store.stock_of(&"P2".into()).await, Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_oversell() {
        let store = seeded(5).await;
        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.reserve_stock(&"P1".into(), 3).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.stock_of(&"P1".into()).await, Some(2));
    }

    #[tokio::test]
    async fn test_commit_placement_writes_order_and_outbox() {
        let store = seeded(10).await;
        let cmd = PlaceOrder::new("B1", "P1", 2, PaymentMethod::Card);

        let placement = store.commit_placement(&cmd).await.unwrap();
        assert_eq!(placement.remaining_stock, 8);
        assert_eq!(placement.order.status(), OrderStatus::Pending);
        assert_eq!(placement.order.total_amount().to_string(), "39.98");
        assert_eq!(placement.outbox.order_id, placement.order.id());

        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_placement_persists_nothing() {
        let store = seeded(0).await;
        let cmd = PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card);

        let result = store.commit_placement(&cmd).await;
        assert!(matches!(result, Err(StorageError::InsufficientStock { .. })));
        assert_eq!(store.order_count().await, 0);
        assert!(store.outbox_entries().await.is_empty());
        assert_eq!(store.stock_of(&"P1".into()).await, Some(0));
    }

    #[tokio::test]
    async fn test_orders_for_buyer_newest_first() {
        let store = seeded(10).await;
        let first = store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Wallet))
            .await
            .unwrap();

        let orders = store.orders_for_buyer(&"B1".into()).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id(), second.order.id());
        assert_eq!(orders[1].id(), first.order.id());
        assert!(store.orders_for_buyer(&"B2".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_is_idempotent() {
        let store = seeded(10).await;
        let placement = store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
            .await
            .unwrap();
        let id = placement.order.id();

        let (order, transition) = store
            .transition(id, OrderStatus::Completed, Some("done".into()))
            .await
            .unwrap();
        assert!(transition.is_applied());
        assert!(order.processed_at().is_some());

        let (again, transition) = store
            .transition(id, OrderStatus::Completed, Some("done".into()))
            .await
            .unwrap();
        assert_eq!(
            transition,
            Transition::Unchanged {
                current: OrderStatus::Completed
            }
        );
        assert_eq!(again, order);
    }

    #[tokio::test]
    async fn test_transition_unknown_order() {
        let store = seeded(10).await;
        let result = store
            .transition(OrderId::new(), OrderStatus::Completed, None)
            .await;
        assert!(matches!(result, Err(StorageError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_outbox_delivery_bookkeeping() {
        let store = seeded(10).await;
        let placement = store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
            .await
            .unwrap();
        let id = placement.outbox.id;

        store.record_failure(id, "channel down").await.unwrap();
        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("channel down"));

        store.mark_delivered(id).await.unwrap();
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_delivered_keeps_pending_entries() {
        let store = seeded(10).await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let placement = store
                .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
                .await
                .unwrap();
            ids.push(placement.outbox.id);
        }
        store.mark_delivered(ids[0]).await.unwrap();
        store.mark_delivered(ids[1]).await.unwrap();

        // Delivered moments ago: still within an hour of retention
        assert_eq!(store.prune_delivered(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.outbox_entries().await.len(), 3);

        assert_eq!(store.prune_delivered(Duration::ZERO).await.unwrap(), 2);
        let left = store.outbox_entries().await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, ids[2]);
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_on_write() {
        let store = seeded(10).await;
        store.set_fail_on_write(true);
        let result = store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
            .await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        store.set_fail_on_write(false);
        assert!(
            store
                .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
                .await
                .is_ok()
        );
    }
}
