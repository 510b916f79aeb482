//! Page requests, paginated results and the parent/child assembler used by list queries.

use std::collections::HashMap;

use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::model::{Order, OrderItem, OrderWithItems};

/// Page used when the caller asks for page < 1.
pub const DEFAULT_PAGE: i64 = 1;

/// Page size used when the caller asks for size < 1.
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// A requested page. Values are taken as given and normalized by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page() -> i64 {
    DEFAULT_PAGE
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl PageRequest {
    pub fn new(page: i64, size: i64) -> Self {
        Self { page, size }
    }

    /// Replaces out-of-range values with the defaults.
    pub fn normalized(self) -> Self {
        Self {
            page: if self.page < 1 { DEFAULT_PAGE } else { self.page },
            size: if self.size < 1 {
                DEFAULT_PAGE_SIZE
            } else {
                self.size
            },
        }
    }

    /// Number of rows to skip. Saturates instead of overflowing for absurd pages.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_PAGE_SIZE)
    }
}

/// One page of results plus the count of all matching rows.
///
/// `total_pages == 0` exactly when `total == 0`, and `data.len() <= size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResult<T> {
    /// Builds a page; `request` must already be normalized.
    pub fn new(data: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            data,
            total,
            page: request.page,
            size: request.size,
            total_pages: total_pages(total, request.size),
        }
    }

    /// A page with no rows.
    pub fn empty(total: i64, request: PageRequest) -> Self {
        Self::new(Vec::new(), total, request)
    }
}

/// ceil(total / size); zero when there are no rows.
pub fn total_pages(total: i64, size: i64) -> i64 {
    if total <= 0 || size <= 0 {
        return 0;
    }
    total / size + i64::from(total % size != 0)
}

/// Attaches each item to its order, keeping the orders in the given sequence.
///
/// Items whose order is not part of `orders` are dropped. Items keep the
/// relative order in which they were supplied.
pub fn assemble(orders: Vec<Order>, items: Vec<OrderItem>) -> Vec<OrderWithItems> {
    let mut by_order: HashMap<OrderId, Vec<OrderItem>> =
        orders.iter().map(|o| (o.id, Vec::new())).collect();

    for item in items {
        if let Some(bucket) = by_order.get_mut(&item.order_id) {
            bucket.push(item);
        }
    }

    orders
        .into_iter()
        .map(|order| {
            let items = by_order.remove(&order.id).unwrap_or_default();
            OrderWithItems { order, items }
        })
        .collect()
}
