//! Order service: validation and orchestration over the order store.

use chrono::Utc;
use common::{ExecutionContext, OrderId, RequestMeta};
use order_store::{OrderRepository, OrderStatusUpdate, OrderWithItems, PageRequest, PaginatedResult};

use super::{CreateOrderInput, UpdateOrderInput, ValidationError, validate_id};
use crate::error::ServiceError;

/// Service for managing orders.
///
/// Validates input, computes totals and delegates persistence to the
/// repository. Every operation runs under the caller's execution context and
/// short-circuits once that context has ended.
pub struct OrderService<R: OrderRepository> {
    repository: R,
}

impl<R: OrderRepository> OrderService<R> {
    /// Creates a new order service over the given repository.
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Returns a reference to the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Creates a pending order whose total is the sum of its line totals.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %meta.request_id, item_count = input.items.len())
    )]
    pub async fn create_order(
        &self,
        ctx: &ExecutionContext,
        meta: &RequestMeta,
        input: CreateOrderInput,
    ) -> Result<OrderId, ServiceError> {
        input.validate().inspect_err(rejected)?;
        ensure_live(ctx, "create_order")?;

        let (order, items) = input.into_new_order();
        let total_amount = order.total_amount;
        let order_id = self.repository.create_order(ctx, order, items).await?;

        tracing::info!(%order_id, %total_amount, "order created");
        Ok(order_id)
    }

    /// Loads an order with its items.
    #[tracing::instrument(skip_all, fields(request_id = %meta.request_id, order_id = %id))]
    pub async fn get_order_by_id(
        &self,
        ctx: &ExecutionContext,
        meta: &RequestMeta,
        id: OrderId,
    ) -> Result<OrderWithItems, ServiceError> {
        validate_id(id).inspect_err(rejected)?;
        ensure_live(ctx, "get_order")?;

        Ok(self.repository.get_order_by_id(ctx, id).await?)
    }

    /// Changes an order's status and stamps its updated-at time.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %meta.request_id, order_id = %input.id, status = %input.status)
    )]
    pub async fn update_order(
        &self,
        ctx: &ExecutionContext,
        meta: &RequestMeta,
        input: UpdateOrderInput,
    ) -> Result<(), ServiceError> {
        validate_id(input.id).inspect_err(rejected)?;
        ensure_live(ctx, "update_order")?;

        let update = OrderStatusUpdate {
            id: input.id,
            status: input.status,
            updated_at: Utc::now(),
        };
        self.repository.update_order(ctx, update).await?;

        tracing::info!(order_id = %input.id, status = %input.status, "order status updated");
        Ok(())
    }

    /// Deletes an order and its items.
    #[tracing::instrument(skip_all, fields(request_id = %meta.request_id, order_id = %id))]
    pub async fn delete_order(
        &self,
        ctx: &ExecutionContext,
        meta: &RequestMeta,
        id: OrderId,
    ) -> Result<(), ServiceError> {
        validate_id(id).inspect_err(rejected)?;
        ensure_live(ctx, "delete_order")?;

        self.repository.delete_order(ctx, id).await?;

        tracing::info!(order_id = %id, "order deleted");
        Ok(())
    }

    /// Lists orders newest first. Paging bounds are normalized by the repository.
    #[tracing::instrument(
        skip_all,
        fields(request_id = %meta.request_id, page = page.page, size = page.size)
    )]
    pub async fn list_orders(
        &self,
        ctx: &ExecutionContext,
        meta: &RequestMeta,
        page: PageRequest,
    ) -> Result<PaginatedResult<OrderWithItems>, ServiceError> {
        ensure_live(ctx, "list_orders")?;

        Ok(self.repository.list_orders(ctx, page).await?)
    }
}

fn rejected(err: &ValidationError) {
    tracing::warn!(error = %err, "input rejected");
}

fn ensure_live(ctx: &ExecutionContext, operation: &'static str) -> Result<(), ServiceError> {
    ctx.check().map_err(|e| {
        tracing::warn!(operation, error = %e, "context ended before the store was called");
        ServiceError::from_context(operation, e)
    })
}

#[cfg(test)]
mod tests {
    use order_store::{InMemoryOrderRepository, Money, OrderStatus};

    use super::*;
    use crate::order::CreateOrderItemInput;

    fn service() -> OrderService<InMemoryOrderRepository> {
        OrderService::new(InMemoryOrderRepository::new())
    }

    fn widget_order() -> CreateOrderInput {
        CreateOrderInput {
            customer_name: "John Doe".to_string(),
            items: vec![CreateOrderItemInput {
                product_name: "Widget".to_string(),
                quantity: 2,
                price: Money::from_cents(5025),
            }],
        }
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected_locally() {
        let service = service();
        let ctx = ExecutionContext::background();
        let meta = RequestMeta::generate();

        for id in [0, -5] {
            let id = OrderId::new(id);
            assert!(matches!(
                service.get_order_by_id(&ctx, &meta, id).await,
                Err(ServiceError::Validation(ValidationError::InvalidOrderId(_)))
            ));
            assert!(matches!(
                service.delete_order(&ctx, &meta, id).await,
                Err(ServiceError::Validation(_))
            ));
            assert!(matches!(
                service
                    .update_order(
                        &ctx,
                        &meta,
                        UpdateOrderInput {
                            id,
                            status: OrderStatus::Completed
                        }
                    )
                    .await,
                Err(ServiceError::Validation(_))
            ));
        }
        assert_eq!(service.repository().transactions_begun(), 0);
    }

    #[tokio::test]
    async fn expired_context_short_circuits_reads() {
        let service = service();
        let meta = RequestMeta::generate();
        let (ctx, handle) = ExecutionContext::cancellable();
        handle.cancel();

        assert!(matches!(
            service.list_orders(&ctx, &meta, PageRequest::default()).await,
            Err(ServiceError::Cancelled {
                operation: "list_orders"
            })
        ));
    }

    #[tokio::test]
    async fn update_stamps_new_status() {
        let service = service();
        let ctx = ExecutionContext::background();
        let meta = RequestMeta::generate();
        let id = service
            .create_order(&ctx, &meta, widget_order())
            .await
            .unwrap();

        service
            .update_order(
                &ctx,
                &meta,
                UpdateOrderInput {
                    id,
                    status: OrderStatus::Processing,
                },
            )
            .await
            .unwrap();

        let order = service.get_order_by_id(&ctx, &meta, id).await.unwrap();
        assert_eq!(order.order.status, OrderStatus::Processing);
        assert!(order.order.updated_at >= order.order.created_at);
        assert_eq!(order.items.len(), 1);
    }
}
