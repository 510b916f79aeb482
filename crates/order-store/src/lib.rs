//! Transactional persistence for orders and their line items.
//!
//! [`OrderRepository`] is the capability the service layer depends on.
//! [`PostgresOrderRepository`] backs it with a connection pool and
//! [`ScopedTransaction`]s; [`InMemoryOrderRepository`] mirrors the same
//! semantics for tests.

pub mod error;
pub mod memory;
pub mod model;
pub mod pagination;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod transaction;

pub use common::{OrderId, OrderItemId};
pub use error::{ErrorKind, Result, StoreError};
pub use memory::InMemoryOrderRepository;
pub use model::{
    Money, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, OrderStatusUpdate,
    OrderWithItems, UnknownStatus,
};
pub use pagination::{DEFAULT_PAGE, DEFAULT_PAGE_SIZE, PageRequest, PaginatedResult};
pub use pool::{DatabaseConfig, connect_pool, wait_for_database};
pub use postgres::PostgresOrderRepository;
pub use repository::OrderRepository;
pub use transaction::ScopedTransaction;
