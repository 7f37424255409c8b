use billing_common::Cents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DurationUnit, Metadata};

//--------------------------------------   OrderStatus     ---------------------------------------------------------
text_enum! {
    /// Lifecycle of an order. `Cancelled` and `Refunded` are terminal.
    pub enum OrderStatus {
        Pending => "pending",
        PendingPayment => "pending_payment",
        Paid => "paid",
        PaymentFailed => "payment_failed",
        Cancelled => "cancelled",
        PartiallyRefunded => "partially_refunded",
        Refunded => "refunded",
    }
}

//--------------------------------------   PaymentMethod     -------------------------------------------------------
text_enum! {
    pub enum PaymentMethod {
        Balance => "balance",
        External => "external",
        Manual => "manual",
    }
}

impl PaymentMethod {
    /// Parses a client-supplied method. An empty value selects `Balance`; the legacy `offline` spelling maps to
    /// `Manual`.
    pub fn from_request(value: Option<&str>) -> Result<Self, super::ConversionError> {
        match value.map(|s| s.trim().to_ascii_lowercase()) {
            None => Ok(Self::Balance),
            Some(s) if s.is_empty() => Ok(Self::Balance),
            Some(s) if s == "offline" => Ok(Self::Manual),
            Some(s) => s.parse(),
        }
    }
}

//--------------------------------------   PaymentStatus     -------------------------------------------------------
text_enum! {
    /// Settlement state, used both on the order and on each payment attempt.
    pub enum PaymentStatus {
        Pending => "pending",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

//--------------------------------------     ItemType        -------------------------------------------------------
text_enum! {
    pub enum ItemType {
        Plan => "plan",
        Discount => "discount",
    }
}

//--------------------------------------   PlanSnapshot      -------------------------------------------------------
/// Frozen copy of what was sold. Written once at order creation and never updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSnapshot {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub unit_price_cents: Cents,
    pub currency: String,
    pub duration_unit: Option<DurationUnit>,
    pub duration_value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_days: Option<i64>,
    pub traffic_limit_bytes: i64,
    pub traffic_multipliers: Value,
    pub devices_limit: i64,
    pub features: Value,
    pub tags: Value,
    pub binding_ids: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_option_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_option_name: Option<String>,
}

//--------------------------------------       Order         -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: i64,
    pub number: String,
    pub user_id: i64,
    pub plan_id: Option<i64>,
    pub idempotency_key: Option<String>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_cents: Cents,
    pub currency: String,
    pub refunded_cents: Cents,
    pub payment_intent_id: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_failure_code: Option<String>,
    pub payment_failure_message: Option<String>,
    pub plan_snapshot: PlanSnapshot,
    pub metadata: Metadata,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_refundable(&self) -> Cents {
        self.total_cents - self.refunded_cents
    }

    pub fn metadata_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub number: String,
    pub user_id: i64,
    pub plan_id: Option<i64>,
    pub idempotency_key: Option<String>,
    pub payment_method: PaymentMethod,
    pub total_cents: Cents,
    pub currency: String,
    pub plan_snapshot: PlanSnapshot,
    pub metadata: Metadata,
}

/// Result of inserting an order. Unique-key collisions are reported as values, since callers handle each one
/// differently.
#[derive(Debug, Clone)]
pub enum InsertOrderResult {
    Inserted(Order),
    DuplicateNumber,
    DuplicateIdempotencyKey,
}

//--------------------------------------     OrderItem       -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub item_type: ItemType,
    pub item_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: Cents,
    pub subtotal_cents: Cents,
    pub currency: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub item_type: ItemType,
    pub item_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: Cents,
    pub subtotal_cents: Cents,
    pub currency: String,
    pub metadata: Metadata,
}

//--------------------------------------    OrderPayment     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPayment {
    pub id: i64,
    pub order_id: i64,
    pub provider: String,
    pub method: String,
    pub intent_id: Option<String>,
    pub status: PaymentStatus,
    pub amount_cents: Cents,
    pub currency: String,
    pub reference: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrderPayment {
    pub order_id: i64,
    pub provider: String,
    pub method: String,
    pub intent_id: Option<String>,
    pub amount_cents: Cents,
    pub currency: String,
    pub metadata: Metadata,
}

/// Patch applied to a payment row. `status` may only move forward; metadata is merged, never replaced.
#[derive(Debug, Clone, Default)]
pub struct PaymentRecordUpdate {
    pub status: Option<PaymentStatus>,
    pub reference: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
}

impl PaymentRecordUpdate {
    pub fn metadata_only(metadata: Metadata) -> Self {
        Self { metadata, ..Default::default() }
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_failure(mut self, code: Option<String>, message: Option<String>) -> Self {
        self.failure_code = code;
        self.failure_message = message;
        self
    }

    pub fn with_processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Some(at);
        self
    }
}

//--------------------------------------  PaymentStateUpdate   -----------------------------------------------------
/// Compound update of an order's settlement fields. `None` leaves a column untouched.
#[derive(Debug, Clone)]
pub struct PaymentStateUpdate {
    pub payment_status: PaymentStatus,
    pub status: Option<OrderStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

impl PaymentStateUpdate {
    pub fn succeeded(paid_at: DateTime<Utc>) -> Self {
        Self {
            payment_status: PaymentStatus::Succeeded,
            status: Some(OrderStatus::Paid),
            payment_method: None,
            paid_at: Some(paid_at),
            payment_reference: None,
            failure_code: None,
            failure_message: None,
        }
    }

    pub fn failed(code: Option<String>, message: Option<String>) -> Self {
        Self {
            payment_status: PaymentStatus::Failed,
            status: Some(OrderStatus::PaymentFailed),
            payment_method: None,
            paid_at: None,
            payment_reference: None,
            failure_code: code,
            failure_message: message,
        }
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.payment_reference = reference;
        self
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }
}

//--------------------------------------    OrderRefund      -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRefund {
    pub id: i64,
    pub order_id: i64,
    pub amount_cents: Cents,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrderRefund {
    pub amount_cents: Cents,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub metadata: Metadata,
}
