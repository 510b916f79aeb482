//! Order operations: inputs, validation and the service that runs them.

mod input;
mod service;

pub use input::{CreateOrderInput, CreateOrderItemInput, UpdateOrderInput};
pub use service::OrderService;

use common::OrderId;
use order_store::Money;
use thiserror::Error;

/// Reasons an order operation is rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Customer name is required.
    #[error("Customer name is required")]
    CustomerNameRequired,

    /// Order has no items.
    #[error("Order must contain at least one item")]
    NoItems,

    /// Item has no product name.
    #[error("Item {index}: product name is required")]
    ProductNameRequired { index: usize },

    /// Invalid quantity.
    #[error("Item {index}: invalid quantity {quantity} (must be greater than 0)")]
    InvalidQuantity { index: usize, quantity: i32 },

    /// Invalid price.
    #[error("Item {index}: invalid price {price} (must not be negative)")]
    NegativePrice { index: usize, price: Money },

    /// Order total does not fit the stored column.
    #[error("Order total {total} exceeds the maximum of {}", Money::MAX_STORED)]
    TotalTooLarge { total: Money },

    /// Invalid order id.
    #[error("Invalid order id: {0} (must be greater than 0)")]
    InvalidOrderId(OrderId),
}

pub(crate) fn validate_id(id: OrderId) -> Result<(), ValidationError> {
    if id.is_valid() {
        Ok(())
    } else {
        Err(ValidationError::InvalidOrderId(id))
    }
}
