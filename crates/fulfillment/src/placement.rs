//! Synchronous order placement.

use std::sync::Arc;
use std::time::Instant;

use channel::EventChannel;
use domain::{Order, PlaceOrder};
use read_cache::OrderHistoryCache;
use storage::PlacementStore;

use crate::PlacementError;
use crate::relay::deliver_entry;

/// Places orders: checks references, reserves stock and commits the order
/// with its outbox entry, then hands the event to the channel.
pub struct PlacementService<S: PlacementStore> {
    store: Arc<S>,
    channel: Arc<dyn EventChannel>,
    cache: OrderHistoryCache<S>,
}

impl<S: PlacementStore> Clone for PlacementService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            channel: Arc::clone(&self.channel),
            cache: self.cache.clone(),
        }
    }
}

impl<S: PlacementStore> PlacementService<S> {
    pub fn new(store: Arc<S>, channel: Arc<dyn EventChannel>, cache: OrderHistoryCache<S>) -> Self {
        Self {
            store,
            channel,
            cache,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &OrderHistoryCache<S> {
        &self.cache
    }

    /// Places an order and returns it in `Pending` status.
    ///
    /// Once this returns `Ok` the order, the stock decrement and the outbox
    /// entry are committed. Publishing happens afterwards on a best-effort
    /// basis; an entry that could not be published here is picked up by the
    /// outbox relay.
    #[tracing::instrument(
        skip(self, cmd),
        fields(
            buyer_id = %cmd.buyer_id,
            product_id = %cmd.product_id,
            quantity = cmd.quantity,
            correlation_id = %cmd.correlation_id,
        )
    )]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<Order, PlacementError> {
        let started = Instant::now();
        let result = self.try_place(&cmd).await;
        metrics::histogram!("placement_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(order_id = %order.id(), total = %order.total_amount(), "order placed");
            }
            Err(PlacementError::Storage(e)) => {
                metrics::counter!("orders_rejected_total", "reason" => "storage").increment(1);
                tracing::error!(error = %e, "order placement failed");
            }
            Err(e) => {
                metrics::counter!("orders_rejected_total", "reason" => e.kind()).increment(1);
                tracing::info!(reason = e.kind(), error = %e, "order rejected");
            }
        }

        result
    }

    async fn try_place(&self, cmd: &PlaceOrder) -> Result<Order, PlacementError> {
        cmd.validate_references()?;

        match self.store.get_account(&cmd.buyer_id).await? {
            Some(account) if account.active => {}
            _ => return Err(PlacementError::BuyerNotFound(cmd.buyer_id.clone())),
        }

        match self.store.get_product(&cmd.product_id).await? {
            Some(product) if product.active => {}
            Some(_) => return Err(PlacementError::ProductInactive(cmd.product_id.clone())),
            None => return Err(PlacementError::ProductNotFound(cmd.product_id.clone())),
        }

        cmd.validated_quantity()?;

        let placement = self.store.commit_placement(cmd).await?;
        tracing::debug!(
            order_id = %placement.order.id(),
            remaining_stock = placement.remaining_stock,
            "placement committed"
        );

        self.cache.invalidate(&cmd.buyer_id).await;

        if let Err(e) =
            deliver_entry(self.store.as_ref(), self.channel.as_ref(), &placement.outbox).await
        {
            tracing::warn!(
                order_id = %placement.order.id(),
                error = %e,
                "event not published, left for the outbox relay"
            );
        }

        Ok(placement.order)
    }
}
