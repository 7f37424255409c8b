use serde::Serialize;

use crate::db_types::{Order, OrderRefund, OrderStatus, Subscription};

/// An order reached `Paid`. Carries the subscription that was provisioned for it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPaidEvent {
    pub order: Order,
    pub subscription: Option<Subscription>,
}

impl OrderPaidEvent {
    pub fn new(order: Order, subscription: Option<Subscription>) -> Self {
        Self { order, subscription }
    }
}

/// An order will not be paid: it was cancelled, or its payment failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderAnnulledEvent {
    pub order: Order,
    pub status: OrderStatus,
    pub reason: Option<String>,
}

impl OrderAnnulledEvent {
    pub fn new(order: Order, reason: Option<String>) -> Self {
        let status = order.status;
        Self { order, status, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRefundedEvent {
    pub order: Order,
    pub refund: OrderRefund,
}

impl OrderRefundedEvent {
    pub fn new(order: Order, refund: OrderRefund) -> Self {
        Self { order, refund }
    }
}
