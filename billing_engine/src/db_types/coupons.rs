use billing_common::Cents;
use chrono::{DateTime, Utc};
use serde::Serialize;

text_enum! {
    pub enum CouponStatus {
        Active => "active",
        Disabled => "disabled",
    }
}

text_enum! {
    pub enum DiscountType {
        Percent => "percent",
        Fixed => "fixed",
    }
}

text_enum! {
    /// `Reserved` and `Applied` redemptions count towards coupon limits; `Released` ones do not.
    pub enum RedemptionStatus {
        Reserved => "reserved",
        Applied => "applied",
        Released => "released",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub status: CouponStatus,
    pub discount_type: DiscountType,
    /// Basis points (1..=10000) for percent coupons, cents for fixed ones.
    pub discount_value: i64,
    pub currency: Option<String>,
    pub min_order_cents: Cents,
    pub max_redemptions: i64,
    pub max_redemptions_per_user: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponRedemption {
    pub id: i64,
    pub coupon_id: i64,
    pub user_id: i64,
    pub order_id: i64,
    pub status: RedemptionStatus,
    pub amount_cents: Cents,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCouponRedemption {
    pub coupon_id: i64,
    pub user_id: i64,
    pub order_id: i64,
    pub status: RedemptionStatus,
    pub amount_cents: Cents,
    pub currency: String,
}
