use billing_common::Cents;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use super::{errors::is_unique_violation_on, from_json_text, to_json_text};
use crate::{
    db::errors::StoreError,
    db_types::{
        merge_metadata,
        InsertOrderResult,
        ItemType,
        Metadata,
        NewOrder,
        NewOrderItem,
        NewOrderRefund,
        Order,
        OrderItem,
        OrderRefund,
        OrderStatus,
        PaymentMethod,
        PaymentStateUpdate,
        PaymentStatus,
    },
    state_machine::status_allows_transition,
};

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    number: String,
    user_id: i64,
    plan_id: Option<i64>,
    idempotency_key: Option<String>,
    status: OrderStatus,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    total_cents: Cents,
    currency: String,
    refunded_cents: Cents,
    payment_intent_id: Option<String>,
    payment_reference: Option<String>,
    payment_failure_code: Option<String>,
    payment_failure_message: Option<String>,
    plan_snapshot: String,
    metadata: String,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            number: row.number,
            user_id: row.user_id,
            plan_id: row.plan_id,
            idempotency_key: row.idempotency_key,
            status: row.status,
            payment_method: row.payment_method,
            payment_status: row.payment_status,
            total_cents: row.total_cents,
            currency: row.currency,
            refunded_cents: row.refunded_cents,
            payment_intent_id: row.payment_intent_id,
            payment_reference: row.payment_reference,
            payment_failure_code: row.payment_failure_code,
            payment_failure_message: row.payment_failure_message,
            plan_snapshot: from_json_text(&row.plan_snapshot)?,
            metadata: from_json_text(&row.metadata)?,
            paid_at: row.paid_at,
            cancelled_at: row.cancelled_at,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    item_type: ItemType,
    item_id: Option<i64>,
    name: String,
    quantity: i64,
    unit_price_cents: Cents,
    subtotal_cents: Cents,
    currency: String,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = StoreError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(OrderItem {
            id: row.id,
            order_id: row.order_id,
            item_type: row.item_type,
            item_id: row.item_id,
            name: row.name,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            subtotal_cents: row.subtotal_cents,
            currency: row.currency,
            metadata: from_json_text(&row.metadata)?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRefundRow {
    id: i64,
    order_id: i64,
    amount_cents: Cents,
    reason: Option<String>,
    reference: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRefundRow> for OrderRefund {
    type Error = StoreError;

    fn try_from(row: OrderRefundRow) -> Result<Self, Self::Error> {
        Ok(OrderRefund {
            id: row.id,
            order_id: row.order_id,
            amount_cents: row.amount_cents,
            reason: row.reason,
            reference: row.reference,
            metadata: from_json_text(&row.metadata)?,
            created_at: row.created_at,
        })
    }
}

fn order_not_found(order_id: i64) -> StoreError {
    StoreError::NotFound(format!("Order {order_id}"))
}

/// Inserts a new order. Unique-key collisions on the order number or the `(user_id, idempotency_key)` pair are
/// returned as [`InsertOrderResult`] variants rather than errors.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<InsertOrderResult, StoreError> {
    let now = Utc::now();
    let snapshot = to_json_text(&order.plan_snapshot)?;
    let metadata = to_json_text(&order.metadata)?;
    let result = sqlx::query_as::<_, OrderRow>(
        r#"
            INSERT INTO orders (
                number,
                user_id,
                plan_id,
                idempotency_key,
                status,
                payment_method,
                payment_status,
                total_cents,
                currency,
                plan_snapshot,
                metadata,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
            RETURNING *;
        "#,
    )
    .bind(&order.number)
    .bind(order.user_id)
    .bind(order.plan_id)
    .bind(&order.idempotency_key)
    .bind(OrderStatus::PendingPayment)
    .bind(order.payment_method)
    .bind(PaymentStatus::Pending)
    .bind(order.total_cents)
    .bind(&order.currency)
    .bind(snapshot)
    .bind(metadata)
    .bind(now)
    .fetch_one(conn)
    .await;
    match result {
        Ok(row) => {
            let order = Order::try_from(row)?;
            debug!("🗃️ Order {} inserted with id {}", order.number, order.id);
            Ok(InsertOrderResult::Inserted(order))
        },
        Err(e) if is_unique_violation_on(&e, "orders.number") => {
            warn!("🗃️ Order number {} collided with an existing order", order.number);
            Ok(InsertOrderResult::DuplicateNumber)
        },
        Err(e) if is_unique_violation_on(&e, "orders.idempotency_key") => {
            debug!("🗃️ User {} already has an order with this idempotency key", order.user_id);
            Ok(InsertOrderResult::DuplicateIdempotencyKey)
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn insert_order_items(
    order_id: i64,
    items: &[NewOrderItem],
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderItem>, StoreError> {
    let now = Utc::now();
    let mut result = Vec::with_capacity(items.len());
    for item in items {
        let row = sqlx::query_as::<_, OrderItemRow>(
            r#"
                INSERT INTO order_items (
                    order_id,
                    item_type,
                    item_id,
                    name,
                    quantity,
                    unit_price_cents,
                    subtotal_cents,
                    currency,
                    metadata,
                    created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING *;
            "#,
        )
        .bind(order_id)
        .bind(item.item_type)
        .bind(item.item_id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.subtotal_cents)
        .bind(&item.currency)
        .bind(to_json_text(&item.metadata)?)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        result.push(OrderItem::try_from(row)?);
    }
    trace!("🗃️ {} items added to order {order_id}", result.len());
    Ok(result)
}

pub async fn fetch_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    let row: Option<OrderRow> =
        sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(conn).await?;
    row.map(Order::try_from).transpose()
}

pub async fn fetch_order_by_idempotency_key(
    user_id: i64,
    key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 AND idempotency_key = $2")
        .bind(user_id)
        .bind(key)
        .fetch_optional(conn)
        .await?;
    row.map(Order::try_from).transpose()
}

pub async fn fetch_order_items(order_id: i64, conn: &mut SqliteConnection) -> Result<Vec<OrderItem>, StoreError> {
    let rows: Vec<OrderItemRow> = sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    rows.into_iter().map(OrderItem::try_from).collect()
}

/// Applies a compound settlement update. The requested order status is checked against the transition rules, and a
/// succeeded order is never marked failed.
pub async fn update_payment_state(
    order_id: i64,
    update: PaymentStateUpdate,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    let current = fetch_order(order_id, conn).await?.ok_or_else(|| order_not_found(order_id))?;
    if let Some(to) = update.status {
        if to != current.status && !status_allows_transition(current.status, to) {
            let msg = format!("Order {order_id} cannot go from {} to {to}", current.status);
            return Err(StoreError::InvalidTransition(msg));
        }
    }
    if current.payment_status == PaymentStatus::Succeeded && update.payment_status != PaymentStatus::Succeeded {
        return Err(StoreError::InvalidTransition(format!(
            "Order {order_id} has a succeeded payment and cannot become {}",
            update.payment_status
        )));
    }
    let row: OrderRow = sqlx::query_as(
        r#"
            UPDATE orders SET
                payment_status = $1,
                status = COALESCE($2, status),
                payment_method = COALESCE($3, payment_method),
                paid_at = COALESCE(paid_at, $4),
                payment_reference = COALESCE($5, payment_reference),
                payment_failure_code = COALESCE($6, payment_failure_code),
                payment_failure_message = COALESCE($7, payment_failure_message),
                updated_at = $8
            WHERE id = $9
            RETURNING *;
        "#,
    )
    .bind(update.payment_status)
    .bind(update.status)
    .bind(update.payment_method)
    .bind(update.paid_at)
    .bind(update.payment_reference)
    .bind(update.failure_code)
    .bind(update.failure_message)
    .bind(Utc::now())
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    let order = Order::try_from(row)?;
    debug!("🗃️ Order {order_id} payment state is now {}/{}", order.status, order.payment_status);
    Ok(order)
}

pub async fn update_order_status(
    order_id: i64,
    status: OrderStatus,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    let current = fetch_order(order_id, conn).await?.ok_or_else(|| order_not_found(order_id))?;
    if !status_allows_transition(current.status, status) {
        let msg = format!("Order {order_id} cannot go from {} to {status}", current.status);
        return Err(StoreError::InvalidTransition(msg));
    }
    let row: OrderRow = sqlx::query_as(
        r#"
            UPDATE orders SET
                status = $1,
                cancelled_at = CASE WHEN $1 = 'cancelled' THEN $2 ELSE cancelled_at END,
                refunded_at = CASE WHEN $1 = 'refunded' THEN $2 ELSE refunded_at END,
                updated_at = $2
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(status)
    .bind(at)
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Order {order_id} status changed from {} to {status}", current.status);
    Order::try_from(row)
}

pub async fn merge_order_metadata(
    order_id: i64,
    patch: Metadata,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    let current = fetch_order(order_id, conn).await?.ok_or_else(|| order_not_found(order_id))?;
    let mut metadata = current.metadata;
    merge_metadata(&mut metadata, patch);
    let row: OrderRow = sqlx::query_as("UPDATE orders SET metadata = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(to_json_text(&metadata)?)
        .bind(Utc::now())
        .bind(order_id)
        .fetch_one(conn)
        .await?;
    Order::try_from(row)
}

pub async fn set_payment_intent(
    order_id: i64,
    intent_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    let row: Option<OrderRow> =
        sqlx::query_as("UPDATE orders SET payment_intent_id = $1, updated_at = $2 WHERE id = $3 RETURNING *")
            .bind(intent_id)
            .bind(Utc::now())
            .bind(order_id)
            .fetch_optional(conn)
            .await?;
    row.map(Order::try_from).transpose()?.ok_or_else(|| order_not_found(order_id))
}

/// Appends a refund row and bumps `refunded_cents` and `refunded_at` on the order. The status is left alone.
pub async fn add_refund(
    order_id: i64,
    refund: NewOrderRefund,
    conn: &mut SqliteConnection,
) -> Result<(Order, OrderRefund), StoreError> {
    let order = fetch_order(order_id, conn).await?.ok_or_else(|| order_not_found(order_id))?;
    if !refund.amount_cents.is_positive() {
        return Err(StoreError::InvalidArgument(format!("Refund amount must be positive, got {}", refund.amount_cents)));
    }
    let remaining = order.remaining_refundable();
    if refund.amount_cents > remaining {
        return Err(StoreError::InvalidArgument(format!(
            "Refund of {} exceeds the {remaining} left to refund on order {order_id}",
            refund.amount_cents
        )));
    }
    let now = Utc::now();
    let row: OrderRefundRow = sqlx::query_as(
        r#"
            INSERT INTO order_refunds (order_id, amount_cents, reason, reference, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(refund.amount_cents)
    .bind(refund.reason)
    .bind(refund.reference)
    .bind(to_json_text(&refund.metadata)?)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    let refund = OrderRefund::try_from(row)?;
    let row: OrderRow = sqlx::query_as(
        r#"
            UPDATE orders SET
                refunded_cents = refunded_cents + $1,
                refunded_at = $2,
                updated_at = $2
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(refund.amount_cents)
    .bind(now)
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    let order = Order::try_from(row)?;
    debug!("🗃️ Refund of {} recorded on order {order_id}. Refunded total {}", refund.amount_cents, order.refunded_cents);
    Ok((order, refund))
}

pub async fn fetch_refunds_for_orders(
    order_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderRefund>, StoreError> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM order_refunds WHERE order_id IN (");
    let mut ids = builder.separated(", ");
    for id in order_ids {
        ids.push_bind(*id);
    }
    builder.push(") ORDER BY id");
    let rows: Vec<OrderRefundRow> = builder.build_query_as().fetch_all(conn).await?;
    rows.into_iter().map(OrderRefund::try_from).collect()
}
