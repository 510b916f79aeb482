//! Domain layer for the order service.
//!
//! This crate provides:
//! - Input types for the order operations and their validation rules
//! - `OrderService`, which validates input, computes totals and delegates
//!   persistence to an `OrderRepository`
//! - `ServiceError`, which keeps cancellation, deadline expiry and missing
//!   orders distinguishable from other failures

pub mod error;
pub mod order;

pub use error::ServiceError;
pub use order::{
    CreateOrderInput, CreateOrderItemInput, OrderService, UpdateOrderInput, ValidationError,
};
