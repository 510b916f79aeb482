use async_trait::async_trait;
use common::{ExecutionContext, OrderId};

use crate::Result;
use crate::model::{NewOrder, NewOrderItem, OrderStatusUpdate, OrderWithItems};
use crate::pagination::{PageRequest, PaginatedResult};

/// Persistence capability for orders and their items.
///
/// Every operation takes the caller's [`ExecutionContext`]. A context that has
/// already ended short-circuits the operation before any statement runs; one
/// that ends mid-operation aborts the in-flight statement and rolls back any
/// open transaction. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts the order and all of its items atomically.
    ///
    /// Either the order row and every item row become visible together, or
    /// nothing does. Returns the identifier assigned by the store.
    async fn create_order(
        &self,
        ctx: &ExecutionContext,
        order: NewOrder,
        items: Vec<NewOrderItem>,
    ) -> Result<OrderId>;

    /// Loads an order and its items, items ordered by id.
    ///
    /// Returns `NotFound` if no order has this id.
    async fn get_order_by_id(&self, ctx: &ExecutionContext, id: OrderId)
    -> Result<OrderWithItems>;

    /// Sets the status and updated-at of an existing order. Items are untouched.
    ///
    /// Returns `NotFound` (and changes nothing) if no order has this id.
    async fn update_order(&self, ctx: &ExecutionContext, update: OrderStatusUpdate) -> Result<()>;

    /// Deletes an order and its items atomically.
    ///
    /// Returns `NotFound` (and changes nothing) if no order has this id.
    async fn delete_order(&self, ctx: &ExecutionContext, id: OrderId) -> Result<()>;

    /// Lists orders newest first, each with its items.
    ///
    /// The page request is normalized here; callers pass it through unchanged.
    async fn list_orders(
        &self,
        ctx: &ExecutionContext,
        page: PageRequest,
    ) -> Result<PaginatedResult<OrderWithItems>>;
}
