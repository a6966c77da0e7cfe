//! Publishes committed outbox entries to the event channel.

use std::sync::Arc;
use std::time::Duration;

use channel::EventChannel;
use storage::{OutboxEntry, OutboxStore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{RelayConfig, RelayError};

/// Publishes one outbox entry and marks it delivered.
///
/// A failed publish is recorded on the entry and returned; the entry stays
/// pending. A crash between publish and mark leaves it pending as well,
/// so the same event may be published twice.
pub async fn deliver_entry<S: OutboxStore + ?Sized>(
    store: &S,
    channel: &dyn EventChannel,
    entry: &OutboxEntry,
) -> Result<(), RelayError> {
    let payload = entry.payload_bytes()?;

    if let Err(e) = channel.publish(&entry.queue, entry.id, &payload).await {
        if let Err(record_err) = store.record_failure(entry.id, &e.to_string()).await {
            tracing::warn!(entry_id = %entry.id, error = %record_err, "failed to record outbox failure");
        }
        return Err(e.into());
    }

    store.mark_delivered(entry.id).await?;
    metrics::counter!("outbox_delivered_total").increment(1);
    tracing::debug!(entry_id = %entry.id, order_id = %entry.order_id, queue = %entry.queue, "outbox entry delivered");
    Ok(())
}

/// Background loop that drains the outbox.
pub struct OutboxRelay<S: OutboxStore> {
    store: Arc<S>,
    channel: Arc<dyn EventChannel>,
    config: RelayConfig,
}

impl<S: OutboxStore> OutboxRelay<S> {
    pub fn new(store: Arc<S>, channel: Arc<dyn EventChannel>, config: RelayConfig) -> Self {
        Self {
            store,
            channel,
            config,
        }
    }

    /// Publishes up to one batch of pending entries, oldest first.
    ///
    /// Stops at the first failure so entries go out in creation order.
    /// Returns the number of entries delivered.
    pub async fn relay_batch(&self) -> Result<usize, RelayError> {
        let pending = self.store.pending_outbox(self.config.batch_size).await?;
        let mut delivered = 0;
        for entry in &pending {
            deliver_entry(self.store.as_ref(), self.channel.as_ref(), entry).await?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Deletes entries delivered longer than `retention` ago.
    pub async fn prune(&self) -> Result<u64, RelayError> {
        let removed = self.store.prune_delivered(self.config.retention).await?;
        if removed > 0 {
            metrics::counter!("outbox_pruned_total").increment(removed);
            tracing::debug!(removed, "pruned delivered outbox entries");
        }
        Ok(removed)
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// After a failed batch the pause doubles, up to `max_backoff`; the first
    /// successful batch resets it. Delivered entries are pruned once per
    /// `prune_interval`.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox relay started"
        );

        let mut backoff = self.config.poll_interval;
        let mut next_prune = Instant::now();
        loop {
            if Instant::now() >= next_prune {
                if let Err(e) = self.prune().await {
                    tracing::warn!(error = %e, "outbox pruning failed");
                }
                next_prune = Instant::now() + self.config.prune_interval;
            }

            let pause = match self.relay_batch().await {
                Ok(delivered) => {
                    backoff = self.config.poll_interval;
                    if delivered > 0 {
                        tracing::debug!(delivered, "outbox batch relayed");
                    }
                    if delivered >= self.config.batch_size {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    }
                }
                Err(e) => {
                    backoff = backoff.saturating_mul(2).min(self.config.max_backoff);
                    metrics::counter!("outbox_relay_failures_total").increment(1);
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "outbox relay failed (will retry)");
                    backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::info!("outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use channel::InMemoryChannel;
    use domain::{Account, Money, OrderPlaced, PaymentMethod, PlaceOrder, Product};
    use storage::{InMemoryStore, PlacementStore};

    async fn setup() -> (Arc<InMemoryStore>, InMemoryChannel) {
        let store = Arc::new(InMemoryStore::new());
        store.add_account(Account::new("B1", "buyer-one")).await;
        store
            .add_product(Product::new("P1", "Widget", Money::from_cents(1999), 10))
            .await;
        (store, InMemoryChannel::new())
    }

    fn relay(store: &Arc<InMemoryStore>, channel: &InMemoryChannel) -> OutboxRelay<InMemoryStore> {
        OutboxRelay::new(
            Arc::clone(store),
            Arc::new(channel.clone()),
            RelayConfig {
                poll_interval: Duration::from_millis(5),
                batch_size: 10,
                max_backoff: Duration::from_millis(20),
                retention: Duration::from_secs(3600),
                prune_interval: Duration::from_secs(60),
            },
        )
    }

    async fn place(store: &InMemoryStore) {
        store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_batch_publishes_pending_entries() {
        let (store, channel) = setup().await;
        place(&store).await;
        place(&store).await;

        let delivered = relay(&store, &channel).relay_batch().await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(channel.depth("order-placed").await, 2);
        assert!(store.pending_outbox(10).await.unwrap().is_empty());

        // Nothing left to do.
        assert_eq!(relay(&store, &channel).relay_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_published_payload_is_the_event() {
        let (store, channel) = setup().await;
        place(&store).await;
        let entry_id = store.outbox_entries().await[0].id;
        relay(&store, &channel).relay_batch().await.unwrap();

        let delivery = channel
            .receive("order-placed", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let event = OrderPlaced::decode(&delivery.payload).unwrap();
        assert_eq!(event.total_amount, Money::from_cents(1999));
        assert_eq!(delivery.message_id, entry_id);
    }

    #[tokio::test]
    async fn test_failed_publish_is_recorded_and_retried() {
        let (store, channel) = setup().await;
        place(&store).await;
        channel.set_unavailable(true);

        let result = relay(&store, &channel).relay_batch().await;
        assert!(matches!(result, Err(RelayError::Channel(_))));
        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());

        channel.set_unavailable(false);
        assert_eq!(relay(&store, &channel).relay_batch().await.unwrap(), 1);
        assert_eq!(channel.depth("order-placed").await, 1);
    }

    #[tokio::test]
    async fn test_prune_respects_retention() {
        let (store, channel) = setup().await;
        place(&store).await;
        place(&store).await;
        let relay = relay(&store, &channel);
        relay.relay_batch().await.unwrap();
        place(&store).await;

        assert_eq!(relay.prune().await.unwrap(), 0);
        assert_eq!(store.outbox_entries().await.len(), 3);

        let eager = OutboxRelay::new(
            Arc::clone(&store),
            Arc::new(channel.clone()),
            RelayConfig {
                retention: Duration::ZERO,
                ..RelayConfig::default()
            },
        );
        assert_eq!(eager.prune().await.unwrap(), 2);
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
        assert_eq!(store.outbox_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_prunes_delivered_entries() {
        let (store, channel) = setup().await;
        place(&store).await;
        let relay = OutboxRelay::new(
            Arc::clone(&store),
            Arc::new(channel.clone()),
            RelayConfig {
                poll_interval: Duration::from_millis(5),
                retention: Duration::ZERO,
                prune_interval: Duration::from_millis(5),
                ..RelayConfig::default()
            },
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(relay.run(shutdown.clone()));

        let mut pruned = false;
        for _ in 0..100 {
            if store.outbox_entries().await.is_empty() {
                pruned = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(pruned);
        assert_eq!(channel.depth("order-placed").await, 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_recovers_after_outage_and_stops_on_cancel() {
        let (store, channel) = setup().await;
        place(&store).await;
        channel.set_unavailable(true);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(relay(&store, &channel).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);

        channel.set_unavailable(false);
        let mut delivered = false;
        for _ in 0..100 {
            if store.pending_outbox(10).await.unwrap().is_empty() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(delivered);
        assert_eq!(channel.depth("order-placed").await, 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
