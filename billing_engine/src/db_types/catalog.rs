use billing_common::Cents;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

text_enum! {
    pub enum DurationUnit {
        Hour => "hour",
        Day => "day",
        Month => "month",
        Year => "year",
    }
}

text_enum! {
    pub enum PlanStatus {
        Active => "active",
        Draft => "draft",
        Archived => "archived",
    }
}

//--------------------------------------        Plan         -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price_cents: Cents,
    pub currency: Option<String>,
    pub duration_unit: DurationUnit,
    pub duration_value: i64,
    pub traffic_limit_bytes: i64,
    pub traffic_multipliers: Value,
    pub devices_limit: i64,
    pub features: Value,
    pub tags: Value,
    pub binding_ids: Value,
    pub visible: bool,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn is_purchasable(&self) -> bool {
        self.visible && self.status == PlanStatus::Active
    }
}

//--------------------------------------  PlanBillingOption  -------------------------------------------------------
/// An alternative price/duration for a plan, e.g. a yearly option next to the monthly default.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanBillingOption {
    pub id: i64,
    pub plan_id: i64,
    pub name: String,
    pub duration_unit: DurationUnit,
    pub duration_value: i64,
    pub price_cents: Cents,
    pub currency: Option<String>,
    pub visible: bool,
    pub status: PlanStatus,
    pub sort_order: i64,
}

impl PlanBillingOption {
    pub fn is_purchasable(&self) -> bool {
        self.visible && self.status == PlanStatus::Active
    }
}

//--------------------------------------   PaymentChannel    -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentChannel {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub provider: String,
    pub enabled: bool,
    /// Raw gateway descriptor. Parsed by [`crate::gateway::GatewayDescriptor::parse`].
    #[serde(skip_serializing)]
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
