//! Types shared by every layer of the order service.

pub mod context;
pub mod types;

pub use context::{CancelHandle, ContextError, ExecutionContext};
pub use types::{OrderId, OrderItemId, RequestMeta};
