use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExecutionContext, OrderId, OrderItemId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Result, StoreError,
    model::{Money, NewOrder, NewOrderItem, Order, OrderItem, OrderStatusUpdate, OrderWithItems},
    pagination::{self, PageRequest, PaginatedResult},
    repository::OrderRepository,
    transaction::{ScopedTransaction, guarded},
};

const ORDER_COLUMNS: &str =
    "id, customer_name, (total_amount * 100)::BIGINT AS total_cents, status, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_name, quantity, (price * 100)::BIGINT AS price_cents, created_at, updated_at";

/// PostgreSQL-backed order repository.
///
/// Amounts are stored as `NUMERIC(12,2)` and exchanged with the driver as
/// integer cents, converted inside the SQL statements. Reads run in a
/// [`ScopedTransaction`] too, so a page and its items come from one snapshot
/// and the server stops them at the caller's deadline.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a repository over an already configured pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let decode = |e: sqlx::Error| StoreError::database("decode_order", None, e);
        let status: String = row.try_get("status").map_err(decode)?;

        Ok(Order {
            id: OrderId::new(row.try_get("id").map_err(decode)?),
            customer_name: row.try_get("customer_name").map_err(decode)?,
            total_amount: Money::from_cents(row.try_get("total_cents").map_err(decode)?),
            status: status.parse().map_err(|_| StoreError::InvalidRow {
                column: "status",
                value: status.clone(),
            })?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let decode = |e: sqlx::Error| StoreError::database("decode_order_item", None, e);

        Ok(OrderItem {
            id: OrderItemId::new(row.try_get("id").map_err(decode)?),
            order_id: OrderId::new(row.try_get("order_id").map_err(decode)?),
            product_name: row.try_get("product_name").map_err(decode)?,
            quantity: row.try_get("quantity").map_err(decode)?,
            price: Money::from_cents(row.try_get("price_cents").map_err(decode)?),
            created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
        })
    }

    async fn insert_order_with_items(
        tx: &mut ScopedTransaction,
        ctx: &ExecutionContext,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> Result<OrderId> {
        let now = Utc::now();

        let insert_started = Instant::now();
        let order_id: i64 = guarded(
            ctx,
            "insert_order",
            None,
            sqlx::query_scalar(
                r#"
                INSERT INTO orders (customer_name, total_amount, status, created_at, updated_at)
                VALUES ($1, CAST($2 AS NUMERIC) / 100, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(&order.customer_name)
            .bind(order.total_amount.cents())
            .bind(order.status.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(tx.conn()),
        )
        .await?;
        let order_id = OrderId::new(order_id);
        tx.set_order_id(order_id);

        tracing::debug!(
            %order_id,
            insert_duration_ms = insert_started.elapsed().as_millis() as u64,
            "order row inserted"
        );

        for (index, item) in items.iter().enumerate() {
            guarded(
                ctx,
                "insert_order_item",
                Some(order_id),
                sqlx::query(
                    r#"
                    INSERT INTO order_items (order_id, product_name, quantity, price, created_at, updated_at)
                    VALUES ($1, $2, $3, CAST($4 AS NUMERIC) / 100, $5, $6)
                    "#,
                )
                .bind(order_id.as_i64())
                .bind(&item.product_name)
                .bind(item.quantity)
                .bind(item.price.cents())
                .bind(now)
                .bind(now)
                .execute(tx.conn()),
            )
            .await
            .inspect_err(|_| {
                tracing::warn!(%order_id, item_index = index, product_name = %item.product_name, "item insert aborted");
            })?;
        }

        Ok(order_id)
    }

    async fn fetch_items(
        tx: &mut ScopedTransaction,
        ctx: &ExecutionContext,
        operation: &'static str,
        order_ids: &[i64],
    ) -> Result<Vec<OrderItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY order_id ASC, id ASC"
        );
        let rows = guarded(
            ctx,
            operation,
            None,
            sqlx::query(&sql).bind(order_ids).fetch_all(tx.conn()),
        )
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }

    async fn count_orders(tx: &mut ScopedTransaction, ctx: &ExecutionContext) -> Result<i64> {
        guarded(
            ctx,
            "count_orders",
            None,
            sqlx::query_scalar("SELECT COUNT(*) FROM orders").fetch_one(tx.conn()),
        )
        .await
    }

    async fn select_order(
        tx: &mut ScopedTransaction,
        ctx: &ExecutionContext,
        id: OrderId,
    ) -> Result<OrderWithItems> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = guarded(
            ctx,
            "get_order",
            Some(id),
            sqlx::query(&sql).bind(id.as_i64()).fetch_optional(tx.conn()),
        )
        .await?;

        let Some(row) = row else {
            tracing::warn!(%id, "order not found");
            return Err(StoreError::NotFound(id));
        };
        let order = Self::row_to_order(&row)?;
        let items = Self::fetch_items(tx, ctx, "get_order_items", &[id.as_i64()]).await?;

        Ok(OrderWithItems { order, items })
    }

    async fn select_page(
        tx: &mut ScopedTransaction,
        ctx: &ExecutionContext,
        page: PageRequest,
    ) -> Result<PaginatedResult<OrderWithItems>> {
        let sql = format!(
            "SELECT COUNT(*) OVER() AS total_count, {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let rows = guarded(
            ctx,
            "list_orders",
            None,
            sqlx::query(&sql)
                .bind(page.size)
                .bind(page.offset())
                .fetch_all(tx.conn()),
        )
        .await?;

        let mut total = 0_i64;
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            total = row
                .try_get("total_count")
                .map_err(|e| StoreError::database("decode_order", None, e))?;
            orders.push(Self::row_to_order(row)?);
        }

        if orders.is_empty() {
            // Past the last page the window count has no row to ride on.
            let total = if page.page > 1 {
                Self::count_orders(tx, ctx).await?
            } else {
                0
            };
            return Ok(PaginatedResult::empty(total, page));
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id.as_i64()).collect();
        let items = Self::fetch_items(tx, ctx, "list_order_items", &ids).await?;

        Ok(PaginatedResult::new(
            pagination::assemble(orders, items),
            total,
            page,
        ))
    }
}

/// Records the duration and outcome of one repository operation.
fn observe<T>(operation: &'static str, started: Instant, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) if e.is_not_found() => "not_found",
        Err(e) if e.is_context_error() => "aborted",
        Err(_) => "error",
    };
    metrics::counter!("order_store_operations_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("order_store_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip_all, fields(item_count = items.len()))]
    async fn create_order(
        &self,
        ctx: &ExecutionContext,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<OrderId> {
        let started = Instant::now();
        tracing::debug!(
            customer_name = %order.customer_name,
            total_amount = %order.total_amount,
            "starting order creation transaction"
        );

        let result = async {
            let mut tx = ScopedTransaction::begin(&self.pool, ctx, "create_order", None).await?;
            let inserted = Self::insert_order_with_items(&mut tx, ctx, &order, &items).await;
            tx.finish(ctx, inserted).await
        }
        .await;

        observe("create_order", started, &result);
        if let Ok(order_id) = &result {
            tracing::info!(
                %order_id,
                customer_name = %order.customer_name,
                total_amount = %order.total_amount,
                item_count = items.len(),
                total_duration_ms = started.elapsed().as_millis() as u64,
                "order and items created"
            );
        }
        result
    }

    #[tracing::instrument(skip_all, fields(order_id = %id))]
    async fn get_order_by_id(
        &self,
        ctx: &ExecutionContext,
        id: OrderId,
    ) -> Result<OrderWithItems> {
        let started = Instant::now();

        let result = async {
            let mut tx = ScopedTransaction::begin(&self.pool, ctx, "get_order", Some(id)).await?;
            let found = Self::select_order(&mut tx, ctx, id).await;
            tx.finish(ctx, found).await
        }
        .await;

        observe("get_order_by_id", started, &result);
        if let Ok(found) = &result {
            tracing::info!(
                order_id = %id,
                item_count = found.items.len(),
                total_duration_ms = started.elapsed().as_millis() as u64,
                "order with items fetched"
            );
        }
        result
    }

    #[tracing::instrument(skip_all, fields(order_id = %update.id, status = %update.status))]
    async fn update_order(&self, ctx: &ExecutionContext, update: OrderStatusUpdate) -> Result<()> {
        let started = Instant::now();
        let id = update.id;

        let result = async {
            let mut tx = ScopedTransaction::begin(&self.pool, ctx, "update_order", Some(id)).await?;
            let updated = guarded(
                ctx,
                "update_order",
                Some(id),
                sqlx::query("UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3")
                    .bind(update.status.as_str())
                    .bind(update.updated_at)
                    .bind(id.as_i64())
                    .execute(tx.conn()),
            )
            .await
            .and_then(|done| {
                if done.rows_affected() == 0 {
                    tracing::warn!(%id, "no rows affected by order update");
                    Err(StoreError::NotFound(id))
                } else {
                    Ok(())
                }
            });
            tx.finish(ctx, updated).await
        }
        .await;

        observe("update_order", started, &result);
        if result.is_ok() {
            tracing::info!(
                order_id = %id,
                status = %update.status,
                total_duration_ms = started.elapsed().as_millis() as u64,
                "order updated"
            );
        }
        result
    }

    #[tracing::instrument(skip_all, fields(order_id = %id))]
    async fn delete_order(&self, ctx: &ExecutionContext, id: OrderId) -> Result<()> {
        let started = Instant::now();

        let result = async {
            let mut tx = ScopedTransaction::begin(&self.pool, ctx, "delete_order", Some(id)).await?;
            let deleted = async {
                let items = guarded(
                    ctx,
                    "delete_order_items",
                    Some(id),
                    sqlx::query("DELETE FROM order_items WHERE order_id = $1")
                        .bind(id.as_i64())
                        .execute(tx.conn()),
                )
                .await?;

                let orders = guarded(
                    ctx,
                    "delete_order",
                    Some(id),
                    sqlx::query("DELETE FROM orders WHERE id = $1")
                        .bind(id.as_i64())
                        .execute(tx.conn()),
                )
                .await?;

                if orders.rows_affected() == 0 {
                    tracing::warn!(%id, "no rows affected by order deletion");
                    return Err(StoreError::NotFound(id));
                }
                Ok(items.rows_affected())
            }
            .await;
            tx.finish(ctx, deleted).await
        }
        .await;

        observe("delete_order", started, &result);
        match result {
            Ok(items_deleted) => {
                tracing::info!(
                    order_id = %id,
                    items_deleted,
                    total_duration_ms = started.elapsed().as_millis() as u64,
                    "order and items deleted"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip_all, fields(page = page.page, size = page.size))]
    async fn list_orders(
        &self,
        ctx: &ExecutionContext,
        page: PageRequest,
    ) -> Result<PaginatedResult<OrderWithItems>> {
        let started = Instant::now();
        let page = page.normalized();

        let result = async {
            let mut tx = ScopedTransaction::begin(&self.pool, ctx, "list_orders", None).await?;
            let listed = Self::select_page(&mut tx, ctx, page).await;
            tx.finish(ctx, listed).await
        }
        .await;

        observe("list_orders", started, &result);
        if let Ok(listed) = &result {
            tracing::debug!(
                total = listed.total,
                page = listed.page,
                size = listed.size,
                total_pages = listed.total_pages,
                returned = listed.data.len(),
                "orders listed"
            );
        }
        result
    }
}
