use common::{ContextError, OrderId};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order does not exist, or a row-affecting statement matched nothing.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The caller cancelled the execution context before the operation finished.
    #[error("Operation {operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The execution context's deadline elapsed before the operation finished.
    #[error("Operation {operation} timed out")]
    DeadlineExceeded { operation: &'static str },

    /// A database error occurred.
    #[error("Database error during {operation}{}: {source}", fmt_order(.order_id))]
    Database {
        operation: &'static str,
        order_id: Option<OrderId>,
        #[source]
        source: sqlx::Error,
    },

    /// A row could not be mapped to the model.
    #[error("Invalid {column} in stored row: {value}")]
    InvalidRow { column: &'static str, value: String },

    /// The database did not become reachable within the readiness window.
    #[error("Database not ready after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
}

fn fmt_order(order_id: &Option<OrderId>) -> String {
    match order_id {
        Some(id) => format!(" (order {id})"),
        None => String::new(),
    }
}

/// Coarse classification used by upper layers to branch on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Cancelled,
    DeadlineExceeded,
    Other,
}

impl StoreError {
    /// Builds the error for a context that ended during `operation`.
    pub fn from_context(operation: &'static str, err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => StoreError::Cancelled { operation },
            ContextError::DeadlineExceeded => StoreError::DeadlineExceeded { operation },
        }
    }

    /// Wraps a driver error with the operation and order it affected.
    pub fn database(
        operation: &'static str,
        order_id: Option<OrderId>,
        source: sqlx::Error,
    ) -> Self {
        StoreError::Database {
            operation,
            order_id,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Cancelled { .. } => ErrorKind::Cancelled,
            StoreError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true for either way the execution context can end.
    pub fn is_context_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Cancelled | ErrorKind::DeadlineExceeded
        )
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
