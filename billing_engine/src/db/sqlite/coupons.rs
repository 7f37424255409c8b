use billing_common::Cents;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db::errors::StoreError,
    db_types::{
        Coupon,
        CouponRedemption,
        CouponStatus,
        DiscountType,
        NewCouponRedemption,
        RedemptionStatus,
    },
};

#[derive(FromRow)]
struct CouponRow {
    id: i64,
    code: String,
    name: String,
    status: CouponStatus,
    discount_type: DiscountType,
    discount_value: i64,
    currency: Option<String>,
    min_order_cents: Cents,
    max_redemptions: i64,
    max_redemptions_per_user: i64,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CouponRow> for Coupon {
    fn from(row: CouponRow) -> Self {
        Coupon {
            id: row.id,
            code: row.code,
            name: row.name,
            status: row.status,
            discount_type: row.discount_type,
            discount_value: row.discount_value,
            currency: row.currency,
            min_order_cents: row.min_order_cents,
            max_redemptions: row.max_redemptions,
            max_redemptions_per_user: row.max_redemptions_per_user,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct RedemptionRow {
    id: i64,
    coupon_id: i64,
    user_id: i64,
    order_id: i64,
    status: RedemptionStatus,
    amount_cents: Cents,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RedemptionRow> for CouponRedemption {
    fn from(row: RedemptionRow) -> Self {
        CouponRedemption {
            id: row.id,
            coupon_id: row.coupon_id,
            user_id: row.user_id,
            order_id: row.order_id,
            status: row.status,
            amount_cents: row.amount_cents,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Codes are stored upper-case; the lookup normalises the input the same way.
pub async fn fetch_coupon_by_code(code: &str, conn: &mut SqliteConnection) -> Result<Option<Coupon>, StoreError> {
    let row: Option<CouponRow> = sqlx::query_as("SELECT * FROM coupons WHERE code = $1")
        .bind(code.trim().to_ascii_uppercase())
        .fetch_optional(conn)
        .await?;
    Ok(row.map(Coupon::from))
}

pub async fn count_active_redemptions(
    coupon_id: i64,
    user_id: Option<i64>,
    conn: &mut SqliteConnection,
) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar(
        r#"
            SELECT COUNT(*) FROM coupon_redemptions
            WHERE coupon_id = $1 AND status != 'released' AND ($2 IS NULL OR user_id = $2)
        "#,
    )
    .bind(coupon_id)
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

pub async fn insert_redemption(
    redemption: NewCouponRedemption,
    conn: &mut SqliteConnection,
) -> Result<CouponRedemption, StoreError> {
    let row: RedemptionRow = sqlx::query_as(
        r#"
            INSERT INTO coupon_redemptions
                (coupon_id, user_id, order_id, status, amount_cents, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *;
        "#,
    )
    .bind(redemption.coupon_id)
    .bind(redemption.user_id)
    .bind(redemption.order_id)
    .bind(redemption.status)
    .bind(redemption.amount_cents)
    .bind(&redemption.currency)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Coupon {} {} for order {}", row.coupon_id, row.status, row.order_id);
    Ok(row.into())
}

pub async fn fetch_redemptions_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<CouponRedemption>, StoreError> {
    let rows: Vec<RedemptionRow> = sqlx::query_as("SELECT * FROM coupon_redemptions WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(CouponRedemption::from).collect())
}

pub async fn set_redemption_status(
    order_id: i64,
    from: &[RedemptionStatus],
    to: RedemptionStatus,
    conn: &mut SqliteConnection,
) -> Result<u64, StoreError> {
    if from.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE coupon_redemptions SET status = ");
    builder.push_bind(to);
    builder.push(", updated_at = ");
    builder.push_bind(Utc::now());
    builder.push(" WHERE order_id = ");
    builder.push_bind(order_id);
    builder.push(" AND status IN (");
    let mut statuses = builder.separated(", ");
    for s in from {
        statuses.push_bind(*s);
    }
    builder.push(")");
    let changed = builder.build().execute(conn).await?.rows_affected();
    if changed > 0 {
        debug!("🗃️ {changed} coupon redemptions on order {order_id} marked {to}");
    }
    Ok(changed)
}
