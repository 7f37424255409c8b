use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use super::{from_json_text, to_json_text};
use crate::{
    db::errors::StoreError,
    db_types::{
        NewSubscription,
        Subscription,
        SubscriptionStatus,
        SubscriptionTemplate,
        SubscriptionTerms,
        TemplateStatus,
    },
};

#[derive(FromRow)]
struct SubscriptionRow {
    id: i64,
    user_id: i64,
    plan_id: Option<i64>,
    plan_name: String,
    plan_snapshot: String,
    status: SubscriptionStatus,
    token: String,
    expires_at: Option<DateTime<Utc>>,
    traffic_total_bytes: i64,
    traffic_used_bytes: i64,
    devices_limit: i64,
    template_id: Option<i64>,
    available_template_ids: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            plan_snapshot: from_json_text(&row.plan_snapshot)?,
            status: row.status,
            token: row.token,
            expires_at: row.expires_at,
            traffic_total_bytes: row.traffic_total_bytes,
            traffic_used_bytes: row.traffic_used_bytes,
            devices_limit: row.devices_limit,
            template_id: row.template_id,
            available_template_ids: from_json_text(&row.available_template_ids)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    status: TemplateStatus,
    is_default: bool,
    created_at: DateTime<Utc>,
}

pub async fn fetch_subscription(
    subscription_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Subscription>, StoreError> {
    let row: Option<SubscriptionRow> = sqlx::query_as("SELECT * FROM subscriptions WHERE id = $1")
        .bind(subscription_id)
        .fetch_optional(conn)
        .await?;
    row.map(Subscription::try_from).transpose()
}

pub async fn fetch_subscriptions_for_user(
    user_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Subscription>, StoreError> {
    let rows: Vec<SubscriptionRow> = sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY id")
        .bind(user_id)
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(Subscription::try_from).collect()
}

/// Published templates in id order. If none are published, drafts are returned instead.
pub async fn fetch_subscription_templates(
    conn: &mut SqliteConnection,
) -> Result<Vec<SubscriptionTemplate>, StoreError> {
    let rows: Vec<TemplateRow> =
        sqlx::query_as("SELECT * FROM subscription_templates ORDER BY id").fetch_all(conn).await?;
    let (published, drafts): (Vec<_>, Vec<_>) = rows.into_iter().partition(|t| t.status == TemplateStatus::Published);
    let chosen = if published.is_empty() { drafts } else { published };
    Ok(chosen
        .into_iter()
        .map(|t| SubscriptionTemplate {
            id: t.id,
            name: t.name,
            status: t.status,
            is_default: t.is_default,
            created_at: t.created_at,
        })
        .collect())
}

pub async fn insert_subscription(
    subscription: NewSubscription,
    conn: &mut SqliteConnection,
) -> Result<Subscription, StoreError> {
    let NewSubscription { user_id, token, terms } = subscription;
    let now = Utc::now();
    let row: SubscriptionRow = sqlx::query_as(
        r#"
            INSERT INTO subscriptions (
                user_id,
                plan_id,
                plan_name,
                plan_snapshot,
                status,
                token,
                expires_at,
                traffic_total_bytes,
                traffic_used_bytes,
                devices_limit,
                template_id,
                available_template_ids,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(terms.plan_id)
    .bind(&terms.plan_name)
    .bind(to_json_text(&terms.plan_snapshot)?)
    .bind(terms.status)
    .bind(token)
    .bind(terms.expires_at)
    .bind(terms.traffic_total_bytes)
    .bind(terms.traffic_used_bytes)
    .bind(terms.devices_limit)
    .bind(terms.template_id)
    .bind(to_json_text(&terms.available_template_ids)?)
    .bind(now)
    .fetch_one(conn)
    .await?;
    let subscription = Subscription::try_from(row)?;
    debug!("🗃️ Subscription {} created for user {user_id}", subscription.id);
    Ok(subscription)
}

pub async fn renew_subscription(
    subscription_id: i64,
    terms: SubscriptionTerms,
    conn: &mut SqliteConnection,
) -> Result<Subscription, StoreError> {
    let row: Option<SubscriptionRow> = sqlx::query_as(
        r#"
            UPDATE subscriptions SET
                plan_id = $1,
                plan_name = $2,
                plan_snapshot = $3,
                status = $4,
                expires_at = $5,
                traffic_total_bytes = $6,
                traffic_used_bytes = $7,
                devices_limit = $8,
                template_id = $9,
                available_template_ids = $10,
                updated_at = $11
            WHERE id = $12
            RETURNING *;
        "#,
    )
    .bind(terms.plan_id)
    .bind(&terms.plan_name)
    .bind(to_json_text(&terms.plan_snapshot)?)
    .bind(terms.status)
    .bind(terms.expires_at)
    .bind(terms.traffic_total_bytes)
    .bind(terms.traffic_used_bytes)
    .bind(terms.devices_limit)
    .bind(terms.template_id)
    .bind(to_json_text(&terms.available_template_ids)?)
    .bind(Utc::now())
    .bind(subscription_id)
    .fetch_optional(conn)
    .await?;
    let row = row.ok_or_else(|| StoreError::NotFound(format!("Subscription {subscription_id}")))?;
    debug!("🗃️ Subscription {subscription_id} renewed until {:?}", row.expires_at);
    Subscription::try_from(row)
}

pub async fn disable_other_active(
    user_id: i64,
    keep_id: i64,
    conn: &mut SqliteConnection,
) -> Result<u64, StoreError> {
    let changed = sqlx::query(
        "UPDATE subscriptions SET status = $1, updated_at = $2 WHERE user_id = $3 AND id != $4 AND status = $5",
    )
    .bind(SubscriptionStatus::Disabled)
    .bind(Utc::now())
    .bind(user_id)
    .bind(keep_id)
    .bind(SubscriptionStatus::Active)
    .execute(conn)
    .await?
    .rows_affected();
    if changed > 0 {
        info!("🗃️ Disabled {changed} other active subscriptions of user {user_id}");
    }
    Ok(changed)
}
