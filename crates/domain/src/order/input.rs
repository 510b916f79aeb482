use common::OrderId;
use order_store::{Money, NewOrder, NewOrderItem, OrderStatus};
use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Input for creating an order.
///
/// There is no total field: the total is always computed from the items, and
/// a `total_amount` sent by a client is ignored during deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderInput {
    pub customer_name: String,
    #[serde(default)]
    pub items: Vec<CreateOrderItemInput>,
}

/// One line of a [`CreateOrderInput`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderItemInput {
    pub product_name: String,
    pub quantity: i32,
    pub price: Money,
}

impl CreateOrderInput {
    /// Checks the input, reporting the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer_name.trim().is_empty() {
            return Err(ValidationError::CustomerNameRequired);
        }
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.product_name.trim().is_empty() {
                return Err(ValidationError::ProductNameRequired { index });
            }
            if item.quantity <= 0 {
                return Err(ValidationError::InvalidQuantity {
                    index,
                    quantity: item.quantity,
                });
            }
            if item.price.is_negative() {
                return Err(ValidationError::NegativePrice {
                    index,
                    price: item.price,
                });
            }
        }

        let total = self.total_amount();
        if total > Money::MAX_STORED {
            return Err(ValidationError::TotalTooLarge { total });
        }
        Ok(())
    }

    /// Sum of price times quantity over all items.
    pub fn total_amount(&self) -> Money {
        self.items
            .iter()
            .map(|item| item.price.multiply(item.quantity))
            .sum()
    }

    /// Builds the pending order and its items for the store.
    pub(crate) fn into_new_order(self) -> (NewOrder, Vec<NewOrderItem>) {
        let items: Vec<NewOrderItem> = self
            .items
            .into_iter()
            .map(|item| NewOrderItem {
                product_name: item.product_name,
                quantity: item.quantity,
                price: item.price,
            })
            .collect();

        let order = NewOrder {
            customer_name: self.customer_name,
            total_amount: items.iter().map(NewOrderItem::line_total).sum(),
            status: OrderStatus::Pending,
        };
        (order, items)
    }
}

/// Input for changing an order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrderInput {
    pub id: OrderId,
    pub status: OrderStatus,
}
