use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{ChannelError, Delivery, EventChannel, Result};

/// A message that was moved out of its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: Uuid,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub reason: String,
}

struct Message {
    message_id: Uuid,
    payload: Vec<u8>,
    attempts: u32,
}

struct Lease {
    message: Message,
    leased_until: Instant,
}

type Queues<'a> = MutexGuard<'a, HashMap<String, QueueState>>;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, Lease>,
    dead: Vec<DeadLetter>,
}

impl QueueState {
    /// Moves expired leases back to the head of the queue, oldest first.
    fn reclaim_expired(&mut self, now: Instant) {
        let mut expired: Vec<i64> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.leased_until <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        for delivery_id in expired.into_iter().rev() {
            if let Some(lease) = self.in_flight.remove(&delivery_id) {
                tracing::debug!(
                    delivery_id,
                    message_id = %lease.message.message_id,
                    "lease expired, requeueing"
                );
                self.ready.push_front(lease.message);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|l| l.leased_until).min()
    }
}

enum Take {
    Delivered(Delivery),
    Empty { next_expiry: Option<Instant> },
}

/// In-memory channel for tests and single-process demo mode.
///
/// A received message is leased for the visibility timeout; if it is not
/// settled by then it goes back to the head of its queue and the stale
/// delivery can no longer be settled.
#[derive(Clone)]
pub struct InMemoryChannel {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    notify: Arc<Notify>,
    next_delivery: Arc<AtomicI64>,
    unavailable: Arc<AtomicBool>,
    visibility_timeout: Duration,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self {
            queues: Arc::default(),
            notify: Arc::default(),
            next_delivery: Arc::default(),
            unavailable: Arc::default(),
            visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

impl InMemoryChannel {
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Makes every operation fail with `Unavailable`, simulating a broker outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of messages waiting to be received.
    pub async fn depth(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Number of messages received but not yet settled.
    pub async fn in_flight(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |q| q.in_flight.len())
    }

    /// Messages dead-lettered on `queue`, oldest first.
    pub async fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.dead.clone())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable(
                "simulated broker outage".to_string(),
            ));
        }
        Ok(())
    }

    async fn try_take(&self, queue: &str) -> Take {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Take::Empty { next_expiry: None };
        };
        let now = Instant::now();
        state.reclaim_expired(now);
        let Some(mut message) = state.ready.pop_front() else {
            return Take::Empty {
                next_expiry: state.next_expiry(),
            };
        };
        message.attempts += 1;

        let delivery_id = self.next_delivery.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery = Delivery {
            delivery_id,
            queue: queue.to_string(),
            message_id: message.message_id,
            payload: message.payload.clone(),
            attempts: message.attempts,
        };
        state.in_flight.insert(
            delivery_id,
            Lease {
                message,
                leased_until: now + self.visibility_timeout,
            },
        );
        Take::Delivered(delivery)
    }

    /// Removes an in-flight message, returning it with the lock still held.
    async fn settle(&self, delivery: &Delivery) -> Result<(Message, Queues<'_>)> {
        let mut queues = self.queues.lock().await;
        let message = queues
            .get_mut(&delivery.queue)
            .and_then(|q| q.in_flight.remove(&delivery.delivery_id))
            .ok_or(ChannelError::UnknownDelivery(delivery.delivery_id))?
            .message;
        Ok((message, queues))
    }
}

#[async_trait]
impl EventChannel for InMemoryChannel {
    async fn publish(&self, queue: &str, message_id: Uuid, payload: &[u8]) -> Result<()> {
        self.check_available()?;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(Message {
                message_id,
                payload: payload.to_vec(),
                attempts: 0,
            });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        self.check_available()?;
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before looking so a publish in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = match self.try_take(queue).await {
                Take::Delivered(delivery) => return Ok(Some(delivery)),
                Take::Empty { next_expiry } => next_expiry.map_or(deadline, |t| t.min(deadline)),
            };
            if tokio::time::timeout_at(wake_at, notified).await.is_err()
                && Instant::now() >= deadline
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        self.settle(delivery).await?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        let (message, mut queues) = self.settle(delivery).await?;
        if let Some(state) = queues.get_mut(&delivery.queue) {
            state.ready.push_back(message);
        }
        drop(queues);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        self.check_available()?;
        let (message, mut queues) = self.settle(delivery).await?;
        if let Some(state) = queues.get_mut(&delivery.queue) {
            state.dead.push(DeadLetter {
                message_id: message.message_id,
                payload: message.payload,
                attempts: message.attempts,
                reason: reason.to_string(),
            });
        }
        tracing::warn!(
            queue = %delivery.queue,
            message_id = %delivery.message_id,
            reason,
            "message dead-lettered"
        );
        metrics::counter!("channel_dead_letters_total").increment(1);
        Ok(())
    }
}
