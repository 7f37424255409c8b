//! # Coupon evaluator
//!
//! Validates a coupon code against an order and works out the discount. The checks run inside the caller's write
//! transaction so that limit counting and the redemption insert cannot interleave with another order using the same
//! coupon.
use billing_common::Cents;
use chrono::{DateTime, Utc};
use log::*;
use thiserror::Error;

use crate::{
    db::{errors::StoreError, traits::BillingTransaction},
    db_types::{Coupon, CouponRedemption, CouponStatus, DiscountType, NewCouponRedemption, RedemptionStatus},
};

/// Percent coupons are expressed in basis points.
pub const BASIS_POINTS: i64 = 10_000;

#[derive(Debug, Clone, Error)]
pub enum CouponError {
    #[error("Coupon {0} does not exist")]
    NotFound(String),
    #[error("Coupon {0} is not active")]
    Disabled(String),
    #[error("Coupon {0} is not valid at this time")]
    OutsideWindow(String),
    #[error("The order total of {total} is below the coupon minimum of {minimum}")]
    BelowMinimum { total: Cents, minimum: Cents },
    #[error("Coupon {0} has been fully redeemed")]
    Exhausted(String),
    #[error("Coupon {0} has already been used the maximum number of times")]
    UserLimitReached(String),
    #[error("Coupon {code} only applies to {currency} orders")]
    CurrencyMismatch { code: String, currency: String },
    #[error("Coupon {0} gives no discount on this order")]
    NoDiscount(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A coupon that passed every check, with the discount it grants.
#[derive(Debug, Clone)]
pub struct CouponQuote {
    pub coupon: Coupon,
    pub discount: Cents,
}

/// Status, validity window and order minimum. Zero-valued bounds are open.
pub fn check_eligibility(coupon: &Coupon, base_total: Cents, now: DateTime<Utc>) -> Result<(), CouponError> {
    if coupon.status != CouponStatus::Active {
        return Err(CouponError::Disabled(coupon.code.clone()));
    }
    let started = coupon.starts_at.map(|t| now >= t).unwrap_or(true);
    let not_ended = coupon.ends_at.map(|t| now <= t).unwrap_or(true);
    if !(started && not_ended) {
        return Err(CouponError::OutsideWindow(coupon.code.clone()));
    }
    if base_total < coupon.min_order_cents {
        return Err(CouponError::BelowMinimum { total: base_total, minimum: coupon.min_order_cents });
    }
    Ok(())
}

/// The discount `coupon` grants on `base_total`, capped at `base_total`.
pub fn compute_discount(coupon: &Coupon, base_total: Cents, currency: &str) -> Result<Cents, CouponError> {
    let amount = match coupon.discount_type {
        DiscountType::Percent => {
            let bps = coupon.discount_value.clamp(0, BASIS_POINTS);
            let discount = i128::from(base_total.value()) * i128::from(bps) / i128::from(BASIS_POINTS);
            // bounded by base_total, so it always fits
            Cents::from(discount as i64)
        },
        DiscountType::Fixed => {
            if let Some(pinned) = coupon.currency.as_deref() {
                if !pinned.eq_ignore_ascii_case(currency) {
                    return Err(CouponError::CurrencyMismatch {
                        code: coupon.code.clone(),
                        currency: pinned.to_ascii_uppercase(),
                    });
                }
            }
            Cents::from(coupon.discount_value)
        },
    };
    let amount = amount.min(base_total);
    if !amount.is_positive() {
        return Err(CouponError::NoDiscount(coupon.code.clone()));
    }
    Ok(amount)
}

/// Loads `code` under the transaction's lock and runs every check, including global and per-user limits.
pub async fn quote_coupon<T: BillingTransaction>(
    tx: &mut T,
    code: &str,
    user_id: i64,
    base_total: Cents,
    currency: &str,
    now: DateTime<Utc>,
) -> Result<CouponQuote, CouponError> {
    let code = code.trim().to_ascii_uppercase();
    let coupon = tx.fetch_coupon_for_update(&code).await?.ok_or_else(|| CouponError::NotFound(code.clone()))?;
    check_eligibility(&coupon, base_total, now)?;
    if coupon.max_redemptions > 0 {
        let used = tx.count_active_redemptions(coupon.id, None).await?;
        if used >= coupon.max_redemptions {
            return Err(CouponError::Exhausted(coupon.code));
        }
    }
    if coupon.max_redemptions_per_user > 0 {
        let used = tx.count_active_redemptions(coupon.id, Some(user_id)).await?;
        if used >= coupon.max_redemptions_per_user {
            return Err(CouponError::UserLimitReached(coupon.code));
        }
    }
    let discount = compute_discount(&coupon, base_total, currency)?;
    debug!("🎟️ Coupon {} grants {discount} off {base_total} for user {user_id}", coupon.code);
    Ok(CouponQuote { coupon, discount })
}

/// Records the redemption. Orders that are already paid get an `Applied` row, everything else a `Reserved` one.
pub async fn record_redemption<T: BillingTransaction>(
    tx: &mut T,
    quote: &CouponQuote,
    user_id: i64,
    order_id: i64,
    currency: &str,
    paid: bool,
) -> Result<CouponRedemption, StoreError> {
    let status = if paid { RedemptionStatus::Applied } else { RedemptionStatus::Reserved };
    tx.insert_redemption(NewCouponRedemption {
        coupon_id: quote.coupon.id,
        user_id,
        order_id,
        status,
        amount_cents: quote.discount,
        currency: currency.to_string(),
    })
    .await
}

/// Payment went through: reserved redemptions of the order become applied. A released redemption no longer holds
/// a place under the coupon's limits and stays released.
pub async fn apply_redemptions<T: BillingTransaction>(tx: &mut T, order_id: i64) -> Result<u64, StoreError> {
    tx.set_redemption_status(order_id, &[RedemptionStatus::Reserved], RedemptionStatus::Applied).await
}

/// Payment failed or the order was cancelled: reserved redemptions are handed back.
pub async fn release_redemptions<T: BillingTransaction>(tx: &mut T, order_id: i64) -> Result<u64, StoreError> {
    tx.set_redemption_status(order_id, &[RedemptionStatus::Reserved], RedemptionStatus::Released).await
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    fn coupon(discount_type: DiscountType, value: i64) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 1,
            code: "WELCOME".into(),
            name: "Welcome".into(),
            status: CouponStatus::Active,
            discount_type,
            discount_value: value,
            currency: None,
            min_order_cents: Cents::zero(),
            max_redemptions: 0,
            max_redemptions_per_user: 0,
            starts_at: None,
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn percent_discounts_use_basis_points() {
        let c = coupon(DiscountType::Percent, 1500);
        assert_eq!(compute_discount(&c, Cents::from(2000), "CNY").unwrap(), Cents::from(300));
        // rounds down
        assert_eq!(compute_discount(&c, Cents::from(999), "CNY").unwrap(), Cents::from(149));
        let full = coupon(DiscountType::Percent, 10_000);
        assert_eq!(compute_discount(&full, Cents::from(2000), "CNY").unwrap(), Cents::from(2000));
    }

    #[test]
    fn fixed_discounts_are_capped_and_pinned() {
        let mut c = coupon(DiscountType::Fixed, 5000);
        assert_eq!(compute_discount(&c, Cents::from(2000), "CNY").unwrap(), Cents::from(2000));
        c.currency = Some("USD".into());
        assert!(matches!(compute_discount(&c, Cents::from(2000), "CNY"), Err(CouponError::CurrencyMismatch { .. })));
        assert!(compute_discount(&c, Cents::from(2000), "usd").is_ok());
    }

    #[test]
    fn zero_discount_is_rejected() {
        let c = coupon(DiscountType::Percent, 1);
        assert!(matches!(compute_discount(&c, Cents::from(50), "CNY"), Err(CouponError::NoDiscount(_))));
        let c = coupon(DiscountType::Fixed, 0);
        assert!(matches!(compute_discount(&c, Cents::from(50), "CNY"), Err(CouponError::NoDiscount(_))));
    }

    #[test]
    fn eligibility_window_and_minimum() {
        let now = Utc::now();
        let mut c = coupon(DiscountType::Fixed, 100);
        assert!(check_eligibility(&c, Cents::from(100), now).is_ok());
        c.starts_at = Some(now + Duration::hours(1));
        assert!(matches!(check_eligibility(&c, Cents::from(100), now), Err(CouponError::OutsideWindow(_))));
        c.starts_at = None;
        c.ends_at = Some(now - Duration::hours(1));
        assert!(matches!(check_eligibility(&c, Cents::from(100), now), Err(CouponError::OutsideWindow(_))));
        c.ends_at = None;
        c.min_order_cents = Cents::from(500);
        assert!(matches!(check_eligibility(&c, Cents::from(100), now), Err(CouponError::BelowMinimum { .. })));
        c.status = CouponStatus::Disabled;
        assert!(matches!(check_eligibility(&c, Cents::from(1000), now), Err(CouponError::Disabled(_))));
    }
}
