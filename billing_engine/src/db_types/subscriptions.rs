use chrono::{DateTime, Utc};
use serde::Serialize;

use super::PlanSnapshot;

text_enum! {
    pub enum SubscriptionStatus {
        Active => "active",
        Disabled => "disabled",
        Expired => "expired",
    }
}

text_enum! {
    pub enum TemplateStatus {
        Published => "published",
        Draft => "draft",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: Option<i64>,
    pub plan_name: String,
    pub plan_snapshot: PlanSnapshot,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing)]
    pub token: String,
    /// `None` means the subscription never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub traffic_total_bytes: i64,
    pub traffic_used_bytes: i64,
    pub devices_limit: i64,
    pub template_id: Option<i64>,
    pub available_template_ids: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entitlement fields written on create and on renewal.
#[derive(Debug, Clone)]
pub struct SubscriptionTerms {
    pub plan_id: Option<i64>,
    pub plan_name: String,
    pub plan_snapshot: PlanSnapshot,
    pub status: SubscriptionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub traffic_total_bytes: i64,
    pub traffic_used_bytes: i64,
    pub devices_limit: i64,
    pub template_id: Option<i64>,
    pub available_template_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: i64,
    pub token: String,
    pub terms: SubscriptionTerms,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionTemplate {
    pub id: i64,
    pub name: String,
    pub status: TemplateStatus,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}
