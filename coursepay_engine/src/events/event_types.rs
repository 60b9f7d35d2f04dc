use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderLine};

/// Fired once per placed order that represents actual revenue; the payload analytics sinks receive.
#[derive(Debug, Clone)]
pub struct OrderCompletedEvent {
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

impl OrderCompletedEvent {
    pub fn new(order: Order, lines: Vec<OrderLine>) -> Self {
        Self { order, lines }
    }
}

/// The message handed to a fulfillment worker: the order number plus the tenant it belongs to. Workers must treat
/// repeated delivery of the same order number as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub order_number: String,
    pub partner_code: String,
}

impl FulfillmentRequest {
    pub fn from_order(order: &Order) -> Self {
        Self { order_number: order.order_number.to_string(), partner_code: order.partner_code.clone() }
    }
}
