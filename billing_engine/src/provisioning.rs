//! # Subscription provisioner
//!
//! Turns a paid order into an entitlement. The provisioner always runs inside the transaction that marked the order
//! as paid, so a failure here rolls the payment transition back as well.
//!
//! Provisioning is idempotent: once an order carries a `subscription_id` that still exists, running it again returns
//! that subscription untouched.
use chrono::{DateTime, Duration, Months, Utc};
use log::*;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    db::{errors::StoreError, traits::BillingTransaction},
    db_types::{
        DurationUnit,
        ItemType,
        Metadata,
        NewSubscription,
        Order,
        OrderItem,
        OrderStatus,
        PlanSnapshot,
        Subscription,
        SubscriptionStatus,
        SubscriptionTemplate,
        SubscriptionTerms,
    },
    helpers::new_subscription_token,
    text_enum,
};

/// chrono durations are limited to `i64::MAX` milliseconds.
const MAX_DURATION_SECONDS: i64 = i64::MAX / 1_000;

#[derive(Debug, Clone, Error)]
pub enum ProvisioningError {
    #[error("Order {0} does not exist")]
    OrderNotFound(i64),
    #[error("Order {0} is not paid")]
    NotPaid(i64),
    #[error("Order {order_id} has unusable plan information: {reason}")]
    InvalidPlan { order_id: i64, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

text_enum! {
    pub enum SubscriptionAction {
        Created => "created",
        Renewed => "renewed",
        Existing => "existing",
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionedSubscription {
    pub subscription: Subscription,
    pub action: SubscriptionAction,
}

/// The entitlement an order buys, read from its first plan line or, failing that, its plan snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanInfo {
    pub plan_id: Option<i64>,
    pub plan_name: String,
    pub duration_unit: DurationUnit,
    pub duration_value: i64,
    pub quantity: i64,
    pub traffic_limit_bytes: i64,
    pub devices_limit: i64,
    pub snapshot: PlanSnapshot,
}

fn meta_i64(metadata: &Metadata, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
}

pub fn plan_info(order: &Order, items: &[OrderItem]) -> Result<PlanInfo, ProvisioningError> {
    let invalid = |reason: &str| ProvisioningError::InvalidPlan { order_id: order.id, reason: reason.to_string() };
    let snapshot = &order.plan_snapshot;
    let plan_item = items.iter().find(|i| i.item_type == ItemType::Plan);
    let (plan_id, plan_name, quantity, item_meta) = match plan_item {
        Some(item) => (item.item_id.or(order.plan_id), item.name.clone(), item.quantity, Some(&item.metadata)),
        None => {
            let plan_id = if snapshot.id > 0 { Some(snapshot.id) } else { order.plan_id };
            (plan_id, snapshot.name.clone(), order.metadata_i64("quantity").unwrap_or(1), None)
        },
    };
    let from_item = |key: &str| item_meta.and_then(|m| meta_i64(m, key));
    let duration_unit = item_meta
        .and_then(|m| m.get("duration_unit"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .or(snapshot.duration_unit)
        .ok_or_else(|| invalid("missing duration unit"))?;
    let duration_value = from_item("duration_value").unwrap_or(snapshot.duration_value);
    if duration_value <= 0 {
        return Err(invalid("duration must be positive"));
    }
    let plan_name = if plan_name.trim().is_empty() { snapshot.name.clone() } else { plan_name };
    if plan_name.trim().is_empty() {
        return Err(invalid("missing plan name"));
    }
    let devices_limit = from_item("devices_limit").unwrap_or(snapshot.devices_limit);
    Ok(PlanInfo {
        plan_id,
        plan_name,
        duration_unit,
        duration_value,
        quantity: quantity.max(1),
        traffic_limit_bytes: from_item("traffic_limit_bytes").unwrap_or(snapshot.traffic_limit_bytes).max(0),
        devices_limit: if devices_limit <= 0 { 1 } else { devices_limit },
        snapshot: snapshot.clone(),
    })
}

/// Adds `value × quantity` units to `base`. Months and years use calendar arithmetic, clamping to the last day of
/// the month where needed. Returns `None` on overflow.
pub fn add_duration(base: DateTime<Utc>, unit: DurationUnit, value: i64, quantity: i64) -> Option<DateTime<Utc>> {
    let total = value.checked_mul(quantity)?;
    let seconds = |per_unit: i64| -> Option<Duration> {
        let secs = total.checked_mul(per_unit)?;
        (secs.abs() <= MAX_DURATION_SECONDS).then(|| Duration::seconds(secs))
    };
    match unit {
        DurationUnit::Hour => base.checked_add_signed(seconds(3_600)?),
        DurationUnit::Day => base.checked_add_signed(seconds(86_400)?),
        DurationUnit::Month => base.checked_add_months(Months::new(u32::try_from(total).ok()?)),
        DurationUnit::Year => base.checked_add_months(Months::new(u32::try_from(total.checked_mul(12)?).ok()?)),
    }
}

fn default_template(templates: &[SubscriptionTemplate]) -> Option<i64> {
    templates.iter().find(|t| t.is_default).or_else(|| templates.first()).map(|t| t.id)
}

/// Picks the subscription to renew: a non-disabled one on the same plan id, else one with the same plan name. The
/// newest match wins.
fn eligible_subscription<'a>(subs: &'a [Subscription], info: &PlanInfo) -> Option<&'a Subscription> {
    let live = || subs.iter().rev().filter(|s| s.status != SubscriptionStatus::Disabled);
    info.plan_id
        .and_then(|id| live().find(|s| s.plan_id == Some(id)))
        .or_else(|| live().find(|s| s.plan_name.trim().eq_ignore_ascii_case(info.plan_name.trim())))
}

/// Creates or renews the subscription paid for by `order_id` and records it on the order's metadata.
pub async fn ensure_order_subscription<T: BillingTransaction>(
    tx: &mut T,
    order_id: i64,
    now: DateTime<Utc>,
) -> Result<ProvisionedSubscription, ProvisioningError> {
    let order = tx.fetch_order_for_update(order_id).await?.ok_or(ProvisioningError::OrderNotFound(order_id))?;
    if order.status != OrderStatus::Paid {
        return Err(ProvisioningError::NotPaid(order_id));
    }
    if let Some(existing_id) = order.metadata_i64("subscription_id") {
        if let Some(subscription) = tx.fetch_subscription(existing_id).await? {
            trace!("🔄️ Order {order_id} is already provisioned with subscription {existing_id}");
            return Ok(ProvisionedSubscription { subscription, action: SubscriptionAction::Existing });
        }
        warn!("🔄️ Order {order_id} points at subscription {existing_id}, which no longer exists. Provisioning again.");
    }
    let items = tx.fetch_order_items(order_id).await?;
    let info = plan_info(&order, &items)?;
    let templates = tx.fetch_subscription_templates().await?;
    let template_id = default_template(&templates);
    let template_ids = templates.iter().map(|t| t.id).collect::<Vec<_>>();
    let paid_at = order.paid_at.unwrap_or(now);
    let traffic_total = info.traffic_limit_bytes.saturating_mul(info.quantity);
    let overflow = || ProvisioningError::InvalidPlan { order_id, reason: "subscription expiry overflows".into() };

    let subs = tx.fetch_subscriptions_for_user(order.user_id).await?;
    let (subscription, action) = match eligible_subscription(&subs, &info) {
        Some(current) => {
            let expires_at = match current.expires_at {
                None => None,
                Some(current_expiry) => {
                    let base = current_expiry.max(paid_at);
                    let next = add_duration(base, info.duration_unit, info.duration_value, info.quantity);
                    Some(next.ok_or_else(overflow)?)
                },
            };
            let lapsed = current.expires_at.map(|t| t < paid_at).unwrap_or(false);
            let status = match expires_at {
                Some(t) if t <= now => SubscriptionStatus::Expired,
                _ => SubscriptionStatus::Active,
            };
            let terms = SubscriptionTerms {
                plan_id: info.plan_id,
                plan_name: info.plan_name.clone(),
                plan_snapshot: info.snapshot.clone(),
                status,
                expires_at,
                traffic_total_bytes: traffic_total,
                traffic_used_bytes: if lapsed { 0 } else { current.traffic_used_bytes },
                devices_limit: info.devices_limit,
                template_id: current.template_id.or(template_id),
                available_template_ids: template_ids,
            };
            let renewed = tx.renew_subscription(current.id, terms).await?;
            info!("🔄️ Order {order_id} renewed subscription {} until {:?}", renewed.id, renewed.expires_at);
            (renewed, SubscriptionAction::Renewed)
        },
        None => {
            let expires_at = add_duration(paid_at, info.duration_unit, info.duration_value, info.quantity)
                .ok_or_else(overflow)?;
            let status = if expires_at > now { SubscriptionStatus::Active } else { SubscriptionStatus::Expired };
            let terms = SubscriptionTerms {
                plan_id: info.plan_id,
                plan_name: info.plan_name.clone(),
                plan_snapshot: info.snapshot.clone(),
                status,
                expires_at: Some(expires_at),
                traffic_total_bytes: traffic_total,
                traffic_used_bytes: 0,
                devices_limit: info.devices_limit,
                template_id,
                available_template_ids: template_ids,
            };
            let created = tx
                .insert_subscription(NewSubscription { user_id: order.user_id, token: new_subscription_token(), terms })
                .await?;
            info!("🔄️ Order {order_id} created subscription {} until {expires_at}", created.id);
            (created, SubscriptionAction::Created)
        },
    };
    tx.disable_other_active(order.user_id, subscription.id).await?;

    let mut patch = Metadata::new();
    patch.insert("subscription_id".into(), json!(subscription.id));
    patch.insert("subscription_action".into(), json!(action.as_str()));
    patch.insert("subscription_plan_name".into(), json!(subscription.plan_name));
    patch.insert("subscription_template_id".into(), json!(subscription.template_id));
    patch.insert("subscription_expires_at".into(), json!(subscription.expires_at.map(|t| t.to_rfc3339())));
    patch.insert("subscription_refreshed_at".into(), json!(now.to_rfc3339()));
    tx.merge_order_metadata(order_id, patch).await?;
    Ok(ProvisionedSubscription { subscription, action })
}

#[cfg(test)]
mod test {
    use billing_common::Cents;
    use chrono::TimeZone;

    use super::*;
    use crate::db_types::{PaymentMethod, PaymentStatus};

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn calendar_months_clamp_to_month_end() {
        assert_eq!(add_duration(at(2024, 1, 31), DurationUnit::Month, 1, 1), Some(at(2024, 2, 29)));
        assert_eq!(add_duration(at(2024, 1, 15), DurationUnit::Month, 1, 3), Some(at(2024, 4, 15)));
        assert_eq!(add_duration(at(2024, 2, 29), DurationUnit::Year, 1, 1), Some(at(2025, 2, 28)));
    }

    #[test]
    fn wall_clock_units() {
        assert_eq!(add_duration(at(2024, 1, 1), DurationUnit::Day, 30, 2), Some(at(2024, 3, 1)));
        assert_eq!(
            add_duration(at(2024, 1, 1), DurationUnit::Hour, 6, 2),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(add_duration(at(2024, 1, 1), DurationUnit::Day, i64::MAX, 2), None);
    }

    fn order_with_snapshot(snapshot: PlanSnapshot) -> Order {
        let now = Utc::now();
        Order {
            id: 1,
            number: "ORD-1".into(),
            user_id: 1,
            plan_id: Some(snapshot.id),
            idempotency_key: None,
            status: OrderStatus::Paid,
            payment_method: PaymentMethod::Balance,
            payment_status: PaymentStatus::Succeeded,
            total_cents: Cents::from(1500),
            currency: "CNY".into(),
            refunded_cents: Cents::zero(),
            payment_intent_id: None,
            payment_reference: None,
            payment_failure_code: None,
            payment_failure_message: None,
            plan_snapshot: snapshot,
            metadata: Metadata::new(),
            paid_at: Some(now),
            cancelled_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn plan_info_falls_back_to_snapshot() {
        let snapshot = PlanSnapshot {
            id: 3,
            name: "Pro".into(),
            duration_unit: Some(DurationUnit::Day),
            duration_value: 30,
            traffic_limit_bytes: 1024,
            devices_limit: 0,
            ..Default::default()
        };
        let info = plan_info(&order_with_snapshot(snapshot), &[]).unwrap();
        assert_eq!(info.plan_id, Some(3));
        assert_eq!(info.plan_name, "Pro");
        assert_eq!(info.quantity, 1);
        assert_eq!(info.devices_limit, 1);
        assert_eq!(info.traffic_limit_bytes, 1024);
    }

    #[test]
    fn plan_info_requires_a_duration() {
        let snapshot = PlanSnapshot { id: 3, name: "Pro".into(), ..Default::default() };
        assert!(matches!(
            plan_info(&order_with_snapshot(snapshot), &[]),
            Err(ProvisioningError::InvalidPlan { .. })
        ));
    }
}
