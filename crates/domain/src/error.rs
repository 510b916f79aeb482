//! Service error types.

use common::{ContextError, OrderId};
use order_store::StoreError;
use thiserror::Error;

use crate::order::ValidationError;

/// Errors returned by [`OrderService`](crate::OrderService).
///
/// Missing orders, caller cancellation and deadline expiry each get their
/// own variant so the transport layer can map them to distinct responses.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The input was rejected before reaching the store.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No order has this id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The caller cancelled the request.
    #[error("Operation {operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The request deadline elapsed.
    #[error("Operation {operation} timed out")]
    DeadlineExceeded { operation: &'static str },

    /// Any other store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl ServiceError {
    pub(crate) fn from_context(operation: &'static str, err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => ServiceError::Cancelled { operation },
            ContextError::DeadlineExceeded => ServiceError::DeadlineExceeded { operation },
        }
    }

    /// Returns true for a missing order.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }

    /// Returns true if the execution context ended before the operation did.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Cancelled { .. } | ServiceError::DeadlineExceeded { .. }
        )
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            StoreError::Cancelled { operation } => ServiceError::Cancelled { operation },
            StoreError::DeadlineExceeded { operation } => {
                ServiceError::DeadlineExceeded { operation }
            }
            other => ServiceError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conditions_are_lifted() {
        let id = OrderId::new(7);
        assert!(matches!(
            ServiceError::from(StoreError::NotFound(id)),
            ServiceError::NotFound(found) if found == id
        ));
        assert!(matches!(
            ServiceError::from(StoreError::from_context("update_order", ContextError::Cancelled)),
            ServiceError::Cancelled { operation: "update_order" }
        ));
        assert!(matches!(
            ServiceError::from(StoreError::from_context(
                "update_order",
                ContextError::DeadlineExceeded
            )),
            ServiceError::DeadlineExceeded { operation: "update_order" }
        ));
    }

    #[test]
    fn other_store_errors_stay_wrapped() {
        let err = ServiceError::from(StoreError::InvalidRow {
            column: "status",
            value: "shipped".to_string(),
        });

        assert!(matches!(err, ServiceError::Store(StoreError::InvalidRow { .. })));
        assert!(!err.is_context_error());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Invalid status in stored row: shipped");
    }
}
