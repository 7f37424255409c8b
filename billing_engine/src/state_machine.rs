//! Transition rules for orders and payment attempts.
//!
//! The store consults these before every status write, so a forbidden transition can never be persisted regardless
//! of which flow requested it.
use crate::db_types::{OrderStatus, PaymentStatus};

/// `Cancelled` and `Refunded` orders accept no further transitions.
pub fn status_is_terminal(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Cancelled | OrderStatus::Refunded)
}

/// Returns true if an order may move from `from` to `to`.
///
/// A repeated partial refund keeps the order in `PartiallyRefunded`, so that self-transition is allowed. Every other
/// self-transition is a no-op and callers must not request it.
pub fn status_allows_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match from {
        Pending => matches!(to, PendingPayment | Paid | PaymentFailed | Cancelled),
        PendingPayment => matches!(to, Paid | PaymentFailed | Cancelled),
        PaymentFailed => matches!(to, Paid | Cancelled),
        Paid => matches!(to, PartiallyRefunded | Refunded),
        PartiallyRefunded => matches!(to, PartiallyRefunded | Refunded),
        Cancelled | Refunded => false,
    }
}

/// Payment attempts only move forward out of `Pending`. `Succeeded` and `Failed` are both final.
pub fn payment_allows_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    from == PaymentStatus::Pending && matches!(to, PaymentStatus::Succeeded | PaymentStatus::Failed)
}

/// Orders the user can still cancel themselves.
pub fn user_may_cancel(status: OrderStatus) -> bool {
    matches!(status, OrderStatus::Pending | OrderStatus::PendingPayment)
}

/// The status an order lands in after its refunded total reaches `refunded` out of `total`.
pub fn status_after_refund(refunded: i64, total: i64) -> OrderStatus {
    if refunded >= total {
        OrderStatus::Refunded
    } else {
        OrderStatus::PartiallyRefunded
    }
}
