use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::time::Instant;
use uuid::Uuid;

use crate::{ChannelError, Delivery, EventChannel, Result};

/// Channel backed by the `channel_messages` table.
///
/// Receiving leases the oldest visible message with `FOR UPDATE SKIP LOCKED`
/// and hides it for the visibility timeout. A consumer that dies without
/// settling its lease gets the message redelivered once the timeout lapses.
#[derive(Clone)]
pub struct PostgresChannel {
    pool: PgPool,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl PostgresChannel {
    /// Default lease length before an unsettled message becomes visible again.
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a channel with the default visibility timeout.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Sets the lease length.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Sets how often an idle `receive` re-checks the table.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of dead-lettered messages on `queue`.
    pub async fn dead_letter_count(&self, queue: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM channel_messages WHERE queue = $1 AND dead_lettered_at IS NOT NULL",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn lease(&self, queue: &str) -> Result<Option<Delivery>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE channel_messages
            SET attempts = attempts + 1,
                visible_at = NOW() + make_interval(secs => $2)
            WHERE delivery_id = (
                SELECT delivery_id
                FROM channel_messages
                WHERE queue = $1 AND dead_lettered_at IS NULL AND visible_at <= NOW()
                ORDER BY delivery_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING delivery_id, message_id, payload, attempts
            "#,
        )
        .bind(queue)
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Delivery> {
            let attempts: i32 = row.try_get("attempts")?;
            Ok(Delivery {
                delivery_id: row.try_get("delivery_id")?,
                queue: queue.to_string(),
                message_id: row.try_get("message_id")?,
                payload: row.try_get("payload")?,
                attempts: u32::try_from(attempts).unwrap_or(0),
            })
        })
        .transpose()
    }

    fn expect_settled(delivery: &Delivery, rows_affected: u64) -> Result<()> {
        if rows_affected == 0 {
            return Err(ChannelError::UnknownDelivery(delivery.delivery_id));
        }
        Ok(())
    }
}

#[async_trait]
impl EventChannel for PostgresChannel {
    async fn publish(&self, queue: &str, message_id: Uuid, payload: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO channel_messages (queue, message_id, payload) VALUES ($1, $2, $3)",
        )
        .bind(queue)
        .bind(message_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(delivery) = self.lease(queue).await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM channel_messages WHERE delivery_id = $1 AND dead_lettered_at IS NULL",
        )
        .bind(delivery.delivery_id)
        .execute(&self.pool)
        .await?;
        Self::expect_settled(delivery, result.rows_affected())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let result = sqlx::query(
            "UPDATE channel_messages SET visible_at = NOW() \
             WHERE delivery_id = $1 AND dead_lettered_at IS NULL",
        )
        .bind(delivery.delivery_id)
        .execute(&self.pool)
        .await?;
        Self::expect_settled(delivery, result.rows_affected())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE channel_messages SET dead_lettered_at = NOW(), dead_letter_reason = $2 \
             WHERE delivery_id = $1 AND dead_lettered_at IS NULL",
        )
        .bind(delivery.delivery_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Self::expect_settled(delivery, result.rows_affected())?;

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
