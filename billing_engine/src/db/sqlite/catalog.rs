//! Read-only catalogue queries: plans, billing options and payment channels.
use billing_common::Cents;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection};

use super::from_json_text;
use crate::{
    db::errors::StoreError,
    db_types::{DurationUnit, PaymentChannel, Plan, PlanBillingOption, PlanStatus},
};

#[derive(FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    slug: String,
    description: String,
    price_cents: Cents,
    currency: Option<String>,
    duration_unit: DurationUnit,
    duration_value: i64,
    traffic_limit_bytes: i64,
    traffic_multipliers: String,
    devices_limit: i64,
    features: String,
    tags: String,
    binding_ids: String,
    visible: bool,
    status: PlanStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = StoreError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            price_cents: row.price_cents,
            currency: row.currency.filter(|c| !c.trim().is_empty()),
            duration_unit: row.duration_unit,
            duration_value: row.duration_value,
            traffic_limit_bytes: row.traffic_limit_bytes,
            traffic_multipliers: from_json_text::<Value>(&row.traffic_multipliers)?,
            devices_limit: row.devices_limit,
            features: from_json_text::<Value>(&row.features)?,
            tags: from_json_text::<Value>(&row.tags)?,
            binding_ids: from_json_text::<Value>(&row.binding_ids)?,
            visible: row.visible,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct BillingOptionRow {
    id: i64,
    plan_id: i64,
    name: String,
    duration_unit: DurationUnit,
    duration_value: i64,
    price_cents: Cents,
    currency: Option<String>,
    visible: bool,
    status: PlanStatus,
    sort_order: i64,
}

impl From<BillingOptionRow> for PlanBillingOption {
    fn from(row: BillingOptionRow) -> Self {
        PlanBillingOption {
            id: row.id,
            plan_id: row.plan_id,
            name: row.name,
            duration_unit: row.duration_unit,
            duration_value: row.duration_value,
            price_cents: row.price_cents,
            currency: row.currency.filter(|c| !c.trim().is_empty()),
            visible: row.visible,
            status: row.status,
            sort_order: row.sort_order,
        }
    }
}

#[derive(FromRow)]
struct ChannelRow {
    id: i64,
    code: String,
    name: String,
    provider: String,
    enabled: bool,
    config: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChannelRow> for PaymentChannel {
    type Error = StoreError;

    fn try_from(row: ChannelRow) -> Result<Self, Self::Error> {
        Ok(PaymentChannel {
            id: row.id,
            code: row.code,
            name: row.name,
            provider: row.provider,
            enabled: row.enabled,
            config: from_json_text::<Value>(&row.config)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn fetch_plan(plan_id: i64, conn: &mut SqliteConnection) -> Result<Option<Plan>, StoreError> {
    let row: Option<PlanRow> =
        sqlx::query_as("SELECT * FROM plans WHERE id = $1").bind(plan_id).fetch_optional(conn).await?;
    row.map(Plan::try_from).transpose()
}

pub async fn fetch_billing_option(
    option_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PlanBillingOption>, StoreError> {
    let row: Option<BillingOptionRow> =
        sqlx::query_as("SELECT * FROM plan_billing_options WHERE id = $1").bind(option_id).fetch_optional(conn).await?;
    Ok(row.map(PlanBillingOption::from))
}

pub async fn fetch_channel(code: &str, conn: &mut SqliteConnection) -> Result<Option<PaymentChannel>, StoreError> {
    let row: Option<ChannelRow> = sqlx::query_as("SELECT * FROM payment_channels WHERE code = $1")
        .bind(code.trim().to_ascii_lowercase())
        .fetch_optional(conn)
        .await?;
    row.map(PaymentChannel::try_from).transpose()
}
