use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, ProductId, RecordStamp, stamp::now};
use domain::{
    Account, DomainError, Money, Order, OrderParts, OrderPlaced, OrderStatus, PaymentMethod,
    PlaceOrder, Product, Transition,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    OutboxEntry, Result, StorageError,
    store::{
        AccountDirectory, OrderStore, OutboxStore, Placement, PlacementStore, StockLedger,
        StockReservation,
    },
};

const ORDER_COLUMNS: &str = "id, buyer_id, product_id, quantity, payment_method, status, \
     total_amount, created_at, updated_at, processed_at, processing_note";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a product, including its stock level.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, unit_price, stock, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                unit_price = EXCLUDED.unit_price,
                stock = EXCLUDED.stock,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(product.unit_price.amount())
        .bind(to_db_count(product.stock, "stock")?)
        .bind(product.active)
        .bind(product.stamp.created_at)
        .bind(product.stamp.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or replaces a buyer account.
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, username, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.id.as_str())
        .bind(&account.username)
        .bind(account.active)
        .bind(account.stamp.created_at)
        .bind(account.stamp.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let payment_method: String = row.try_get("payment_method")?;
        let quantity: i32 = row.try_get("quantity")?;

        Ok(Order::from_parts(OrderParts {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            buyer_id: BuyerId::new(row.try_get::<String, _>("buyer_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: from_db_count(quantity, "quantity")?,
            payment_method: payment_method.parse::<PaymentMethod>().map_err(|_| {
                DomainError::InvalidStoredValue {
                    field: "payment_method",
                    value: payment_method.clone(),
                }
            })?,
            status: status
                .parse::<OrderStatus>()
                .map_err(|_| DomainError::InvalidStoredValue {
                    field: "status",
                    value: status.clone(),
                })?,
            total_amount: Money::new(row.try_get::<Decimal, _>("total_amount")?),
            stamp: RecordStamp {
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            },
            processed_at: row.try_get("processed_at")?,
            processing_note: row.try_get("processing_note")?,
        }))
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            unit_price: Money::new(row.try_get::<Decimal, _>("unit_price")?),
            stock: from_db_count(row.try_get("stock")?, "stock")?,
            active: row.try_get("active")?,
            stamp: RecordStamp {
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            },
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            queue: row.try_get("queue")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            attempts: from_db_count(row.try_get("attempts")?, "attempts")?,
            last_error: row.try_get("last_error")?,
            delivered_at: row.try_get("delivered_at")?,
        })
    }
}

fn to_db_count(value: u32, field: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        StorageError::Domain(DomainError::InvalidStoredValue {
            field,
            value: value.to_string(),
        })
    })
}

fn from_db_count(value: i32, field: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        StorageError::Domain(DomainError::InvalidStoredValue {
            field,
            value: value.to_string(),
        })
    })
}

/// Counts a reservation attempt once its outcome is final.
///
/// Refusals count immediately; a successful reservation only counts after
/// the statement or transaction holding it has committed.
fn record_reservation<T>(result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "reserved",
        Err(
            StorageError::ProductNotFound(_)
            | StorageError::ProductInactive(_)
            | StorageError::InsufficientStock { .. },
        ) => "refused",
        Err(_) => return,
    };
    metrics::counter!("stock_reservations_total", "outcome" => outcome).increment(1);
}

/// Conditional decrement on one connection.
///
/// The `stock >= $2` predicate and the decrement run as one statement, so
/// the row lock taken by the UPDATE serializes concurrent reservations of
/// the same product. Zero affected rows means the reservation was refused;
/// a follow-up read tells the caller why.
async fn reserve_on(
    conn: &mut PgConnection,
    product_id: &ProductId,
    quantity: u32,
    at: DateTime<Utc>,
) -> Result<StockReservation> {
    let requested = to_db_count(quantity, "quantity")?;

    let row: Option<PgRow> = sqlx::query(
        r#"
        UPDATE products
        SET stock = stock - $2, updated_at = $3
        WHERE id = $1 AND active AND stock >= $2
        RETURNING unit_price, stock
        "#,
    )
    .bind(product_id.as_str())
    .bind(requested)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(row) = row {
        return Ok(StockReservation {
            product_id: product_id.clone(),
            quantity,
            unit_price: Money::new(row.try_get::<Decimal, _>("unit_price")?),
            remaining: from_db_count(row.try_get("stock")?, "stock")?,
        });
    }

    let current: Option<PgRow> = sqlx::query("SELECT active, stock FROM products WHERE id = $1")
        .bind(product_id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    match current {
        None => Err(StorageError::ProductNotFound(product_id.clone())),
        Some(row) if !row.try_get::<bool, _>("active")? => {
            Err(StorageError::ProductInactive(product_id.clone()))
        }
        Some(row) => Err(StorageError::InsufficientStock {
            product_id: product_id.clone(),
            requested: quantity,
            available: from_db_count(row.try_get("stock")?, "stock")?,
        }),
    }
}

#[async_trait]
impl StockLedger for PostgresStore {
    async fn reserve_stock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockReservation> {
        let mut conn = self.pool.acquire().await?;
        let result = reserve_on(&mut *conn, product_id, quantity, now()).await;
        record_reservation(&result);
        result
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, name, unit_price, stock, active, created_at, updated_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> =
            sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
                .bind(order_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn orders_for_buyer(&self, buyer_id: &BuyerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE buyer_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(buyer_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self, note), fields(order_id = %order_id, target = %target))]
    async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        note: Option<String>,
    ) -> Result<(Order, Transition)> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let mut order = row
            .map(Self::row_to_order)
            .transpose()?
            .ok_or(StorageError::OrderNotFound(order_id))?;

        let transition = order.transition_to(target, note, now());
        if transition.is_applied() {
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, updated_at = $3, processed_at = $4, processing_note = $5
                WHERE id = $1
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(order.status().as_str())
            .bind(order.updated_at())
            .bind(order.processed_at())
            .bind(order.processing_note())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(?transition, "order transition settled");
        Ok((order, transition))
    }
}

#[async_trait]
impl AccountDirectory for PostgresStore {
    async fn get_account(&self, buyer_id: &BuyerId) -> Result<Option<Account>> {
        let row: Option<PgRow> = sqlx::query(
            "SELECT id, username, active, created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(buyer_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Account {
                id: BuyerId::new(row.try_get::<String, _>("id")?),
                username: row.try_get("username")?,
                active: row.try_get("active")?,
                stamp: RecordStamp {
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                },
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, queue, payload, created_at, attempts, last_error, delivered_at
            FROM outbox
            WHERE delivered_at IS NULL
            ORDER BY seq ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_delivered(&self, entry_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET delivered_at = COALESCE(delivered_at, $2) WHERE id = $1",
        )
        .bind(entry_id)
        .bind(now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::OutboxEntryNotFound(entry_id));
        }
        Ok(())
    }

    async fn prune_delivered(&self, retention: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox
            WHERE delivered_at IS NOT NULL
              AND delivered_at <= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(retention.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn record_failure(&self, entry_id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
        )
        .bind(entry_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::OutboxEntryNotFound(entry_id));
        }
        Ok(())
    }
}

#[async_trait]
impl PlacementStore for PostgresStore {
    #[tracing::instrument(
        skip(self, cmd),
        fields(buyer_id = %cmd.buyer_id, product_id = %cmd.product_id, quantity = cmd.quantity)
    )]
    async fn commit_placement(&self, cmd: &PlaceOrder) -> Result<Placement> {
        let quantity = cmd.validated_quantity()?;
        let at = now();

        // Dropping `tx` on any early return rolls the whole placement back.
        let mut tx = self.pool.begin().await?;

        let reservation = reserve_on(&mut *tx, &cmd.product_id, quantity, at).await;
        if reservation.is_err() {
            record_reservation(&reservation);
        }
        let reservation = reservation?;
        let order = Order::place(cmd, reservation.unit_price, at)?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, buyer_id, product_id, quantity, payment_method, status,
                                total_amount, created_at, updated_at, processed_at, processing_note)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.buyer_id().as_str())
        .bind(order.product_id().as_str())
        .bind(to_db_count(order.quantity(), "quantity")?)
        .bind(order.payment_method().as_str())
        .bind(order.status().as_str())
        .bind(order.total_amount().amount())
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(order.processed_at())
        .bind(order.processing_note())
        .execute(&mut *tx)
        .await?;

        let event = OrderPlaced::from_order(&order, cmd.correlation_id.clone());
        let outbox = OutboxEntry::order_placed(&event)?;

        sqlx::query(
            r#"
            INSERT INTO outbox (id, order_id, queue, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(outbox.id)
        .bind(outbox.order_id.as_uuid())
        .bind(&outbox.queue)
        .bind(&outbox.payload)
        .bind(outbox.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        record_reservation(&Ok(()));
        tracing::debug!(order_id = %order.id(), outbox_id = %outbox.id, "placement committed");

        Ok(Placement {
            order,
            outbox,
            remaining_stock: reservation.remaining,
        })
    }
}
