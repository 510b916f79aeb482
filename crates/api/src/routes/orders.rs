//! Order CRUD endpoints.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use common::OrderId;
use domain::{CreateOrderInput, OrderService, UpdateOrderInput};
use order_store::{OrderRepository, OrderStatus, OrderWithItems, PageRequest, PaginatedResult};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::middleware::RequestScope;

/// Shared application state accessible from all handlers.
pub struct AppState<R: OrderRepository> {
    pub order_service: OrderService<R>,
}

impl<R: OrderRepository> AppState<R> {
    pub fn new(order_service: OrderService<R>) -> Self {
        Self { order_service }
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub message: &'static str,
    pub id: OrderId,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

// -- Handlers --

/// POST /api/v1/orders: create an order with its items.
#[tracing::instrument(skip_all)]
pub async fn create<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Extension(scope): Extension<RequestScope>,
    body: Result<Json<CreateOrderInput>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let Json(input) = body.map_err(bad_body)?;

    let id = state
        .order_service
        .create_order(&scope.ctx, &scope.meta, input)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            message: "Order created successfully",
            id,
        }),
    ))
}

/// GET /api/v1/orders/{id}: a single order with its items.
#[tracing::instrument(skip_all)]
pub async fn get<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Extension(scope): Extension<RequestScope>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<DataResponse<OrderWithItems>>, ApiError> {
    let id = order_id(id)?;

    let order = state
        .order_service
        .get_order_by_id(&scope.ctx, &scope.meta, id)
        .await?;

    Ok(Json(DataResponse { data: order }))
}

/// PUT /api/v1/orders/{id}/status: change an order's status.
#[tracing::instrument(skip_all)]
pub async fn update_status<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Extension(scope): Extension<RequestScope>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = order_id(id)?;
    let Json(req) = body.map_err(bad_body)?;

    state
        .order_service
        .update_order(
            &scope.ctx,
            &scope.meta,
            UpdateOrderInput {
                id,
                status: req.status,
            },
        )
        .await?;

    Ok(Json(MessageResponse {
        message: "Order updated successfully",
    }))
}

/// DELETE /api/v1/orders/{id}: delete an order and its items.
#[tracing::instrument(skip_all)]
pub async fn delete<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Extension(scope): Extension<RequestScope>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let id = order_id(id)?;

    state
        .order_service
        .delete_order(&scope.ctx, &scope.meta, id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Order deleted successfully",
        }),
    ))
}

/// GET /api/v1/orders?page=&size=: orders newest first, one page at a time.
#[tracing::instrument(skip_all)]
pub async fn list<R: OrderRepository + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Extension(scope): Extension<RequestScope>,
    query: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<PaginatedResult<OrderWithItems>>, ApiError> {
    let Query(page) =
        query.map_err(|e| ApiError::BadRequest(format!("Invalid paging parameters: {}", e.body_text())))?;

    let orders = state
        .order_service
        .list_orders(&scope.ctx, &scope.meta, page)
        .await?;

    Ok(Json(orders))
}

fn order_id(path: Result<Path<i64>, PathRejection>) -> Result<OrderId, ApiError> {
    path.map(|Path(id)| OrderId::new(id))
        .map_err(|_| ApiError::BadRequest("Invalid order id".to_string()))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}
