//! Asynchronous fulfillment worker.

use std::sync::Arc;

use channel::{Delivery, EventChannel};
use common::OrderId;
use domain::{OrderPlaced, OrderStatus, Transition};
use read_cache::OrderHistoryCache;
use storage::{OrderStore, StorageError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{WorkerConfig, WorkerError};

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The order moved to the configured status; the message was acked.
    Fulfilled { order_id: OrderId, from: OrderStatus },
    /// The order had already reached the status; the message was acked.
    AlreadyDone { order_id: OrderId, status: OrderStatus },
    /// No such order; the message was acked.
    OrderMissing { order_id: OrderId },
    /// The message can never be processed.
    DeadLettered { reason: String },
    /// The message was returned to the queue.
    Requeued { reason: String },
}

impl HandleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            HandleOutcome::Fulfilled { .. } => "fulfilled",
            HandleOutcome::AlreadyDone { .. } => "already_done",
            HandleOutcome::OrderMissing { .. } => "order_missing",
            HandleOutcome::DeadLettered { .. } => "dead_lettered",
            HandleOutcome::Requeued { .. } => "requeued",
        }
    }
}

/// Consumes `OrderPlaced` events and moves each order to the configured
/// status.
///
/// Handling is idempotent: the status change is a conditional forward move
/// under a row lock, so a redelivered event only acks.
pub struct FulfillmentWorker<S: OrderStore> {
    store: Arc<S>,
    channel: Arc<dyn EventChannel>,
    cache: OrderHistoryCache<S>,
    config: WorkerConfig,
}

impl<S: OrderStore + 'static> FulfillmentWorker<S> {
    pub fn new(
        store: Arc<S>,
        channel: Arc<dyn EventChannel>,
        cache: OrderHistoryCache<S>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            channel,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Consumes deliveries until `shutdown` is cancelled.
    ///
    /// At most `concurrency` deliveries are handled at once. On shutdown no
    /// new delivery is taken; in-flight handlers see the cancellation, nack
    /// their delivery and are awaited before this returns.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            target_status = %self.config.target_status,
            "fulfillment worker started"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "fulfillment task panicked");
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.channel.receive(&self.config.queue, self.config.poll_wait) => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "receive failed (will retry)");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_wait) => {}
                    }
                    continue;
                }
            };

            let worker = Arc::clone(&self);
            let cancel = shutdown.clone();
            tasks.spawn(async move {
                let _permit = permit;
                match worker.handle(&delivery, &cancel).await {
                    Ok(outcome) => {
                        metrics::counter!("worker_messages_total", "outcome" => outcome.label())
                            .increment(1);
                    }
                    Err(e) => {
                        metrics::counter!("worker_messages_total", "outcome" => "settle_failed")
                            .increment(1);
                        tracing::error!(
                            delivery_id = delivery.delivery_id,
                            error = %e,
                            "failed to settle delivery, it will be redelivered"
                        );
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "fulfillment task panicked");
            }
        }
        tracing::info!("fulfillment worker stopped");
    }

    /// Handles one delivery and settles it.
    ///
    /// Returns an error only if settling the delivery itself failed; the
    /// message then stays leased and is redelivered later.
    #[tracing::instrument(
        skip(self, delivery, shutdown),
        fields(delivery_id = delivery.delivery_id, attempts = delivery.attempts)
    )]
    pub async fn handle(
        &self,
        delivery: &Delivery,
        shutdown: &CancellationToken,
    ) -> Result<HandleOutcome, WorkerError> {
        if delivery.attempts > self.config.max_attempts {
            let reason = format!(
                "gave up after {} delivery attempts",
                self.config.max_attempts
            );
            self.channel.dead_letter(delivery, &reason).await?;
            return Ok(HandleOutcome::DeadLettered { reason });
        }

        let event = match OrderPlaced::decode(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                let reason = e.to_string();
                self.channel.dead_letter(delivery, &reason).await?;
                return Ok(HandleOutcome::DeadLettered { reason });
            }
        };
        let order_id = event.order_id;
        tracing::debug!(%order_id, correlation_id = %event.correlation_id, "fulfilling order");

        if !self.config.latency.is_zero() {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.channel.nack(delivery).await?;
                    return Ok(HandleOutcome::Requeued { reason: "shutdown".to_string() });
                }
                _ = tokio::time::sleep(self.config.latency) => {}
            }
        }

        let note = Some(format!("fulfilled by worker (message {})", delivery.message_id));
        match self
            .store
            .transition(order_id, self.config.target_status, note)
            .await
        {
            Ok((order, Transition::Applied { from, to })) => {
                if !self.cache.invalidate(order.buyer_id()).await {
                    tracing::warn!(%order_id, "order history cache left stale until TTL");
                }
                self.channel.ack(delivery).await?;
                tracing::info!(%order_id, %from, %to, "order fulfilled");
                Ok(HandleOutcome::Fulfilled { order_id, from })
            }
            Ok((_, Transition::Unchanged { current })) => {
                self.channel.ack(delivery).await?;
                tracing::info!(%order_id, status = %current, "duplicate delivery, order already handled");
                Ok(HandleOutcome::AlreadyDone {
                    order_id,
                    status: current,
                })
            }
            Err(StorageError::OrderNotFound(_)) => {
                self.channel.ack(delivery).await?;
                tracing::warn!(%order_id, "event references unknown order, dropping it");
                Ok(HandleOutcome::OrderMissing { order_id })
            }
            Err(e) => {
                tracing::warn!(%order_id, error = %e, "fulfillment failed (will retry)");
                self.channel.nack(delivery).await?;
                Ok(HandleOutcome::Requeued {
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use channel::InMemoryChannel;
    use common::{BuyerId, CorrelationId};
    use domain::{Account, Money, PaymentMethod, PlaceOrder, Product};
    use read_cache::{InMemoryCache, InvalidationPolicy};
    use storage::{InMemoryStore, PlacementStore};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<InMemoryStore>,
        channel: InMemoryChannel,
        worker: FulfillmentWorker<InMemoryStore>,
    }

    async fn fixture(config: WorkerConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        store.add_account(Account::new("B1", "buyer-one")).await;
        store
            .add_product(Product::new("P1", "Widget", Money::from_cents(1999), 10))
            .await;
        let channel = InMemoryChannel::new();
        let cache = OrderHistoryCache::new(Arc::clone(&store), Arc::new(InMemoryCache::new()))
            .with_policy(InvalidationPolicy {
                retries: 0,
                initial_backoff: Duration::from_millis(1),
            });
        let worker = FulfillmentWorker::new(
            Arc::clone(&store),
            Arc::new(channel.clone()),
            cache,
            config,
        );
        Fixture {
            store,
            channel,
            worker,
        }
    }

    fn instant() -> WorkerConfig {
        WorkerConfig {
            latency: Duration::ZERO,
            poll_wait: Duration::from_millis(10),
            ..WorkerConfig::default()
        }
    }

    /// Places an order and publishes its event; returns the order ID.
    async fn place_and_publish(f: &Fixture) -> OrderId {
        let placement = f
            .store
            .commit_placement(&PlaceOrder::new("B1", "P1", 1, PaymentMethod::Card))
            .await
            .unwrap();
        f.channel
            .publish(
                "order-placed",
                placement.outbox.id,
                &placement.outbox.payload_bytes().unwrap(),
            )
            .await
            .unwrap();
        placement.order.id()
    }

    async fn next(f: &Fixture) -> Delivery {
        f.channel
            .receive("order-placed", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_handle_fulfills_pending_order() {
        let f = fixture(instant()).await;
        let order_id = place_and_publish(&f).await;

        let outcome = f
            .worker
            .handle(&next(&f).await, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            HandleOutcome::Fulfilled {
                order_id,
                from: OrderStatus::Pending
            }
        );

        let order = f.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(order.processed_at().is_some());
        assert!(order.processing_note().is_some());
        assert_eq!(f.channel.depth("order-placed").await, 0);
        assert_eq!(f.channel.in_flight("order-placed").await, 0);
    }

    #[tokio::test]
    async fn test_redelivery_only_acks() {
        let f = fixture(instant()).await;
        let order_id = place_and_publish(&f).await;
        let delivery = next(&f).await;
        let token = CancellationToken::new();
        f.worker.handle(&delivery, &token).await.unwrap();
        let first = f.store.get_order(order_id).await.unwrap().unwrap();

        // Same message again, as after a lost ack.
        let payload = delivery.payload.clone();
        f.channel
            .publish("order-placed", delivery.message_id, &payload)
            .await
            .unwrap();
        let outcome = f.worker.handle(&next(&f).await, &token).await.unwrap();
        assert_eq!(
            outcome,
            HandleOutcome::AlreadyDone {
                order_id,
                status: OrderStatus::Completed
            }
        );

        let second = f.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(first.processed_at(), second.processed_at());
        assert_eq!(first.updated_at(), second.updated_at());
    }

    #[tokio::test]
    async fn test_processing_target_is_not_terminal() {
        let f = fixture(WorkerConfig {
            target_status: OrderStatus::Processing,
            ..instant()
        })
        .await;
        let order_id = place_and_publish(&f).await;
        f.worker
            .handle(&next(&f).await, &CancellationToken::new())
            .await
            .unwrap();

        let order = f.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Processing);
        assert!(order.processed_at().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered() {
        let f = fixture(instant()).await;
        f.channel
            .publish("order-placed", Uuid::new_v4(), b"{\"orderId\": 42")
            .await
            .unwrap();

        let outcome = f
            .worker
            .handle(&next(&f).await, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::DeadLettered { .. }));
        assert_eq!(f.channel.dead_letters("order-placed").await.len(), 1);
        assert_eq!(f.channel.depth("order-placed").await, 0);
    }

    #[tokio::test]
    async fn test_unknown_order_is_acked() {
        let f = fixture(instant()).await;
        let ghost = OrderPlaced {
            order_id: OrderId::new(),
            buyer_ref: BuyerId::new("B1"),
            product_ref: "P1".into(),
            quantity: 1,
            total_amount: Money::from_cents(1999),
            created_at: common::stamp::now(),
            correlation_id: CorrelationId::generate(),
        };
        let payload = serde_json::to_vec(&ghost).unwrap();
        f.channel
            .publish("order-placed", Uuid::new_v4(), &payload)
            .await
            .unwrap();

        let outcome = f
            .worker
            .handle(&next(&f).await, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            HandleOutcome::OrderMissing {
                order_id: ghost.order_id
            }
        );
        assert!(f.channel.dead_letters("order-placed").await.is_empty());
        assert_eq!(f.channel.in_flight("order-placed").await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_requeues() {
        let f = fixture(instant()).await;
        let order_id = place_and_publish(&f).await;
        f.store.set_fail_on_write(true);

        let outcome = f
            .worker
            .handle(&next(&f).await, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::Requeued { .. }));
        assert_eq!(f.channel.depth("order-placed").await, 1);

        f.store.set_fail_on_write(false);
        let outcome = f
            .worker
            .handle(&next(&f).await, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::Fulfilled { .. }));
        let order = f.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Completed);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_dead_lettered() {
        let f = fixture(WorkerConfig {
            max_attempts: 1,
            ..instant()
        })
        .await;
        let order_id = place_and_publish(&f).await;
        let delivery = next(&f).await;
        f.channel.nack(&delivery).await.unwrap();

        let redelivered = next(&f).await;
        assert_eq!(redelivered.attempts, 2);
        let outcome = f
            .worker
            .handle(&redelivered, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::DeadLettered { .. }));

        let order = f.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancellation_during_latency_nacks() {
        let f = fixture(WorkerConfig {
            latency: Duration::from_secs(60),
            ..instant()
        })
        .await;
        let order_id = place_and_publish(&f).await;
        let token = CancellationToken::new();
        token.cancel();

        let outcome = f.worker.handle(&next(&f).await, &token).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Requeued { .. }));
        assert_eq!(f.channel.depth("order-placed").await, 1);

        let order = f.store.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops() {
        let f = fixture(WorkerConfig {
            concurrency: 2,
            ..instant()
        })
        .await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(place_and_publish(&f).await);
        }

        let store = Arc::clone(&f.store);
        let worker = Arc::new(f.worker);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&worker).run(shutdown.clone()));

        let mut done = false;
        for _ in 0..200 {
            let mut all = true;
            for id in &ids {
                let order = store.get_order(*id).await.unwrap().unwrap();
                all &= order.status() == OrderStatus::Completed;
            }
            if all {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
