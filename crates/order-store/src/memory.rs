use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{ExecutionContext, OrderId, OrderItemId};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    Result, StoreError,
    model::{NewOrder, NewOrderItem, Order, OrderItem, OrderStatusUpdate, OrderWithItems},
    pagination::{self, PageRequest, PaginatedResult},
    repository::OrderRepository,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<OrderItemId, OrderItem>,
    next_order_id: i64,
    next_item_id: i64,
}

impl Tables {
    fn items_of(&self, order_id: OrderId) -> Vec<OrderItem> {
        self.items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// In-memory order repository for testing.
///
/// Mirrors the transactional behaviour of the PostgreSQL implementation: a
/// write works on a private copy of the tables that replaces the shared state
/// only on commit. Every simulated statement honours the execution context,
/// optionally after an artificial delay, so cancellation and timeouts can be
/// exercised deterministically.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    tables: Arc<RwLock<Tables>>,
    counters: Arc<Counters>,
    statement_latency: Option<Duration>,
    fail_item_insert_at: Option<usize>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every simulated statement by `latency`.
    pub fn with_statement_latency(mut self, latency: Duration) -> Self {
        self.statement_latency = Some(latency);
        self
    }

    /// Makes the item insert at `index` (zero-based) fail with a database error.
    pub fn failing_item_insert(mut self, index: usize) -> Self {
        self.fail_item_insert_at = Some(index);
        self
    }

    /// Number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Number of committed order items.
    pub async fn item_count(&self) -> usize {
        self.tables.read().await.items.len()
    }

    /// Number of transactions that got past `BEGIN`.
    pub fn transactions_begun(&self) -> usize {
        self.counters.begun.load(Ordering::SeqCst)
    }

    /// Number of committed transactions.
    pub fn transactions_committed(&self) -> usize {
        self.counters.committed.load(Ordering::SeqCst)
    }

    /// Number of rolled back transactions.
    pub fn transactions_rolled_back(&self) -> usize {
        self.counters.rolled_back.load(Ordering::SeqCst)
    }

    /// Clears all orders and items.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }

    async fn statement(&self, ctx: &ExecutionContext, operation: &'static str) -> Result<()> {
        let latency = self.statement_latency;
        ctx.run(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
        })
        .await
        .map_err(|e| StoreError::from_context(operation, e))
    }

    async fn begin(
        &self,
        ctx: &ExecutionContext,
        operation: &'static str,
    ) -> Result<(RwLockWriteGuard<'_, Tables>, Tables)> {
        self.statement(ctx, operation).await?;
        let guard = self.write_tables(ctx, operation).await?;
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        let working = guard.clone();
        Ok((guard, working))
    }

    /// Waits for the write lock unless `ctx` ends first.
    async fn write_tables(
        &self,
        ctx: &ExecutionContext,
        operation: &'static str,
    ) -> Result<RwLockWriteGuard<'_, Tables>> {
        ctx.run(self.tables.write())
            .await
            .map_err(|e| StoreError::from_context(operation, e))
    }

    /// Waits for a read lock unless `ctx` ends first.
    async fn read_tables(
        &self,
        ctx: &ExecutionContext,
        operation: &'static str,
    ) -> Result<RwLockReadGuard<'_, Tables>> {
        ctx.run(self.tables.read())
            .await
            .map_err(|e| StoreError::from_context(operation, e))
    }

    async fn finish<T>(
        &self,
        ctx: &ExecutionContext,
        operation: &'static str,
        mut guard: RwLockWriteGuard<'_, Tables>,
        working: Tables,
        result: Result<T>,
    ) -> Result<T> {
        let committed = match result {
            Ok(value) => self.statement(ctx, operation).await.map(|()| value),
            Err(e) => Err(e),
        };
        match committed {
            Ok(value) => {
                *guard = working;
                self.counters.committed.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(operation, error = %e, "in-memory transaction rolled back");
                Err(e)
            }
        }
    }

    async fn insert_order_with_items(
        &self,
        tables: &mut Tables,
        ctx: &ExecutionContext,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<OrderId> {
        let now = Utc::now();

        self.statement(ctx, "insert_order").await?;
        tables.next_order_id += 1;
        let order_id = OrderId::new(tables.next_order_id);
        tables.orders.insert(
            order_id,
            Order {
                id: order_id,
                customer_name: order.customer_name,
                total_amount: order.total_amount,
                status: order.status,
                created_at: now,
                updated_at: now,
            },
        );

        for (index, item) in items.into_iter().enumerate() {
            self.statement(ctx, "insert_order_item").await?;
            if self.fail_item_insert_at == Some(index) {
                return Err(StoreError::database(
                    "insert_order_item",
                    Some(order_id),
                    sqlx::Error::Protocol(format!("injected failure at item {index}")),
                ));
            }
            tables.next_item_id += 1;
            let item_id = OrderItemId::new(tables.next_item_id);
            tables.items.insert(
                item_id,
                OrderItem {
                    id: item_id,
                    order_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    price: item.price,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        Ok(order_id)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create_order(
        &self,
        ctx: &ExecutionContext,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<OrderId> {
        let (guard, mut working) = self.begin(ctx, "create_order").await?;
        let result = self
            .insert_order_with_items(&mut working, ctx, order, items)
            .await;
        self.finish(ctx, "create_order", guard, working, result).await
    }

    async fn get_order_by_id(
        &self,
        ctx: &ExecutionContext,
        id: OrderId,
    ) -> Result<OrderWithItems> {
        self.statement(ctx, "get_order").await?;
        let order = self
            .read_tables(ctx, "get_order")
            .await?
            .orders
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;

        self.statement(ctx, "get_order_items").await?;
        let items = self.read_tables(ctx, "get_order_items").await?.items_of(id);

        Ok(OrderWithItems { order, items })
    }

    async fn update_order(&self, ctx: &ExecutionContext, update: OrderStatusUpdate) -> Result<()> {
        let (guard, mut working) = self.begin(ctx, "update_order").await?;
        let result = async {
            self.statement(ctx, "update_order").await?;
            let order = working
                .orders
                .get_mut(&update.id)
                .ok_or(StoreError::NotFound(update.id))?;
            order.status = update.status;
            order.updated_at = update.updated_at;
            Ok::<_, StoreError>(())
        }
        .await;
        self.finish(ctx, "update_order", guard, working, result).await
    }

    async fn delete_order(&self, ctx: &ExecutionContext, id: OrderId) -> Result<()> {
        let (guard, mut working) = self.begin(ctx, "delete_order").await?;
        let result = async {
            self.statement(ctx, "delete_order_items").await?;
            working.items.retain(|_, item| item.order_id != id);

            self.statement(ctx, "delete_order").await?;
            match working.orders.remove(&id) {
                Some(_) => Ok::<_, StoreError>(()),
                None => Err(StoreError::NotFound(id)),
            }
        }
        .await;
        self.finish(ctx, "delete_order", guard, working, result).await
    }

    async fn list_orders(
        &self,
        ctx: &ExecutionContext,
        page: PageRequest,
    ) -> Result<PaginatedResult<OrderWithItems>> {
        let page = page.normalized();

        self.statement(ctx, "list_orders").await?;
        let (total, orders) = {
            let tables = self.read_tables(ctx, "list_orders").await?;
            let mut all: Vec<&Order> = tables.orders.values().collect();
            all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

            let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
            let size = usize::try_from(page.size).unwrap_or(usize::MAX);
            let orders: Vec<Order> = all.into_iter().skip(offset).take(size).cloned().collect();
            (tables.orders.len() as i64, orders)
        };

        if orders.is_empty() {
            let total = if page.page > 1 { total } else { 0 };
            return Ok(PaginatedResult::empty(total, page));
        }

        self.statement(ctx, "list_order_items").await?;
        let items: Vec<OrderItem> = {
            let tables = self.read_tables(ctx, "list_order_items").await?;
            tables
                .items
                .values()
                .filter(|item| orders.iter().any(|o| o.id == item.order_id))
                .cloned()
                .collect()
        };

        Ok(PaginatedResult::new(
            pagination::assemble(orders, items),
            total,
            page,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::{Money, OrderStatus};

    fn new_order(name: &str, items: &[NewOrderItem]) -> NewOrder {
        NewOrder {
            customer_name: name.to_string(),
            total_amount: items.iter().map(NewOrderItem::line_total).sum(),
            status: OrderStatus::Pending,
        }
    }

    fn item(name: &str, quantity: i32, cents: i64) -> NewOrderItem {
        NewOrderItem {
            product_name: name.to_string(),
            quantity,
            price: Money::from_cents(cents),
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_items_in_insertion_order() {
        let repo = InMemoryOrderRepository::new();
        let ctx = ExecutionContext::background();
        let items = vec![item("Widget", 2, 5025), item("Gadget", 1, 100)];

        let id = repo
            .create_order(&ctx, new_order("John Doe", &items), items)
            .await
            .unwrap();
        let found = repo.get_order_by_id(&ctx, id).await.unwrap();

        assert_eq!(found.order.customer_name, "John Doe");
        assert_eq!(found.order.total_amount.cents(), 10150);
        let names: Vec<&str> = found.items.iter().map(|i| i.product_name.as_str()).collect();
        assert_eq!(names, vec!["Widget", "Gadget"]);
        assert!(found.items.iter().all(|i| i.order_id == id));
    }

    #[tokio::test]
    async fn failing_item_insert_leaves_nothing_behind() {
        let repo = InMemoryOrderRepository::new().failing_item_insert(1);
        let ctx = ExecutionContext::background();
        let items = vec![item("A", 1, 100), item("B", 1, 100), item("C", 1, 100)];

        let err = repo
            .create_order(&ctx, new_order("Jane", &items), items)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(repo.order_count().await, 0);
        assert_eq!(repo.item_count().await, 0);
        assert_eq!(repo.transactions_rolled_back(), 1);
    }

    #[tokio::test]
    async fn cancelled_context_never_begins() {
        let repo = InMemoryOrderRepository::new();
        let (ctx, handle) = ExecutionContext::cancellable();
        handle.cancel();
        let items = vec![item("A", 1, 100)];

        let err = repo
            .create_order(&ctx, new_order("Jane", &items), items)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(repo.transactions_begun(), 0);
        assert_eq!(repo.order_count().await, 0);
    }

    #[tokio::test]
    async fn deadline_mid_transaction_rolls_back() {
        let repo = InMemoryOrderRepository::new().with_statement_latency(Duration::from_millis(30));
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(80));
        let items = vec![item("A", 1, 100), item("B", 1, 100), item("C", 1, 100)];

        let err = repo
            .create_order(&ctx, new_order("Jane", &items), items)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert_eq!(repo.transactions_begun(), 1);
        assert_eq!(repo.transactions_rolled_back(), 1);
        assert_eq!(repo.order_count().await, 0);
        assert_eq!(repo.item_count().await, 0);
    }

    #[tokio::test]
    async fn queued_transaction_honours_its_deadline() {
        let repo = InMemoryOrderRepository::new();
        let ctx = ExecutionContext::background();
        let items = vec![item("A", 1, 100)];
        let id = repo
            .create_order(&ctx, new_order("Jane", &items), items)
            .await
            .unwrap();

        // Another writer holds the tables for longer than the deadline.
        let held = repo.tables.write().await;
        let short = ExecutionContext::background().with_timeout(Duration::from_millis(50));

        let update = tokio::time::timeout(
            Duration::from_secs(1),
            repo.update_order(
                &short,
                OrderStatusUpdate {
                    id,
                    status: OrderStatus::Completed,
                    updated_at: Utc::now(),
                },
            ),
        )
        .await
        .expect("update should give up at its deadline");
        assert_eq!(update.unwrap_err().kind(), ErrorKind::DeadlineExceeded);

        let short = ExecutionContext::background().with_timeout(Duration::from_millis(50));
        let read = tokio::time::timeout(Duration::from_secs(1), repo.get_order_by_id(&short, id))
            .await
            .expect("read should give up at its deadline");
        assert_eq!(read.unwrap_err().kind(), ErrorKind::DeadlineExceeded);

        drop(held);
        assert_eq!(repo.transactions_begun(), 1);
        let stored = repo.get_order_by_id(&ctx, id).await.unwrap();
        assert_eq!(stored.order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_order_change_nothing() {
        let repo = InMemoryOrderRepository::new();
        let ctx = ExecutionContext::background();
        let items = vec![item("A", 1, 100)];
        repo.create_order(&ctx, new_order("Jane", &items), items)
            .await
            .unwrap();

        let missing = OrderId::new(999);
        let err = repo
            .update_order(
                &ctx,
                OrderStatusUpdate {
                    id: missing,
                    status: OrderStatus::Completed,
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = repo.delete_order(&ctx, missing).await.unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(repo.order_count().await, 1);
        assert_eq!(repo.item_count().await, 1);
    }

    #[tokio::test]
    async fn list_pages_newest_first() {
        let repo = InMemoryOrderRepository::new();
        let ctx = ExecutionContext::background();
        for n in 0..5 {
            let items = vec![item("A", 1, 100), item("B", 2, 100)];
            repo.create_order(&ctx, new_order(&format!("c{n}"), &items), items)
                .await
                .unwrap();
        }

        let first = repo.list_orders(&ctx, PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.total_pages, 3);
        let names: Vec<&str> = first.data.iter().map(|o| o.order.customer_name.as_str()).collect();
        assert_eq!(names, vec!["c4", "c3"]);

        let last = repo.list_orders(&ctx, PageRequest::new(3, 2)).await.unwrap();
        assert_eq!(last.data.len(), 1);
        assert_eq!(last.total, 5);

        let beyond = repo.list_orders(&ctx, PageRequest::new(4, 2)).await.unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total, 5);
        assert_eq!(beyond.total_pages, 3);
    }
}
