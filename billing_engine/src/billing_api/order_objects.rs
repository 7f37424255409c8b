use billing_common::Cents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{
    BalanceTransaction,
    Order,
    OrderItem,
    OrderPayment,
    OrderRefund,
    OrderStatus,
    PaymentMethod,
    PaymentStatus,
    Subscription,
    UserBalance,
};

/// Largest quantity a single order may buy.
pub const MAX_QUANTITY: i64 = 10;

//--------------------------------------       Requests       --------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub plan_id: i64,
    #[serde(default)]
    pub billing_option_id: Option<i64>,
    #[serde(default)]
    pub quantity: Option<i64>,
    /// `balance`, `external` or `manual`. `offline` is accepted as an alias for `manual`.
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_channel: Option<String>,
    #[serde(default)]
    pub payment_return_url: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CreateOrderRequest {
    pub fn new(plan_id: i64) -> Self {
        Self { plan_id, ..Default::default() }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.payment_method = Some(method.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.payment_channel = Some(channel.to_string());
        self
    }

    pub fn with_return_url(mut self, url: &str) -> Self {
        self.payment_return_url = Some(url.to_string());
        self
    }

    pub fn with_coupon(mut self, code: &str) -> Self {
        self.coupon_code = Some(code.to_string());
        self
    }

    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkPaidRequest {
    /// Debit the order total from the user's balance.
    #[serde(default)]
    pub charge_balance: bool,
    /// `manual` or `balance`. Defaults to `balance` when charging the balance, `manual` otherwise. `balance` and
    /// `charge_balance` go together.
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub amount_cents: Cents,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A payment result reported by a gateway, already authenticated by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub order_id: i64,
    pub payment_id: i64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentCallback {
    pub fn succeeded(order_id: i64, payment_id: i64) -> Self {
        Self {
            order_id,
            payment_id,
            status: PaymentStatus::Succeeded,
            reference: None,
            failure_code: None,
            failure_message: None,
            paid_at: None,
        }
    }

    pub fn failed(order_id: i64, payment_id: i64, code: Option<&str>, message: Option<&str>) -> Self {
        Self {
            order_id,
            payment_id,
            status: PaymentStatus::Failed,
            reference: None,
            failure_code: code.map(String::from),
            failure_message: message.map(String::from),
            paid_at: None,
        }
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub fn with_paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = Some(paid_at);
        self
    }
}

/// The JSON body a gateway posts to the webhook endpoint. `status` is free text and is canonicalised before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub order_id: i64,
    pub payment_id: i64,
    pub status: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub failure_code: Option<String>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

//--------------------------------------       Responses      --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<OrderPayment>,
    pub refunds: Vec<OrderRefund>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderResult {
    pub order: OrderDetail,
    pub balance: UserBalance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_transaction: Option<BalanceTransaction>,
    /// True when an earlier order with the same idempotency key was returned instead of creating a new one.
    pub replayed: bool,
    /// Set when the order was stored but the gateway could not start the payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkPaidResult {
    pub order: Order,
    pub subscription: Subscription,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_transaction: Option<BalanceTransaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub order: Order,
    pub refund: OrderRefund,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_transaction: Option<BalanceTransaction>,
}

/// The result of applying a payment status reported by a callback or a reconcile run.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub order: Order,
    pub payment: OrderPayment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    /// False when the report matched what was already recorded, or was still pending.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStatusView {
    pub order_id: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_failure_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_failure_message: Option<String>,
    pub refunded_cents: Cents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for PaymentStatusView {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            payment_intent_id: order.payment_intent_id,
            payment_reference: order.payment_reference,
            payment_failure_code: order.payment_failure_code,
            payment_failure_message: order.payment_failure_message,
            refunded_cents: order.refunded_cents,
            paid_at: order.paid_at,
            cancelled_at: order.cancelled_at,
            refunded_at: order.refunded_at,
            updated_at: order.updated_at,
        }
    }
}
