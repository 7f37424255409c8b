use billing_common::Cents;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use super::{from_json_text, to_json_text};
use crate::{
    db::errors::StoreError,
    db_types::{merge_metadata, NewOrderPayment, OrderPayment, PaymentRecordUpdate, PaymentStatus},
    state_machine::payment_allows_transition,
};

#[derive(FromRow)]
struct OrderPaymentRow {
    id: i64,
    order_id: i64,
    provider: String,
    method: String,
    intent_id: Option<String>,
    status: PaymentStatus,
    amount_cents: Cents,
    currency: String,
    reference: Option<String>,
    failure_code: Option<String>,
    failure_message: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderPaymentRow> for OrderPayment {
    type Error = StoreError;

    fn try_from(row: OrderPaymentRow) -> Result<Self, Self::Error> {
        Ok(OrderPayment {
            id: row.id,
            order_id: row.order_id,
            provider: row.provider,
            method: row.method,
            intent_id: row.intent_id,
            status: row.status,
            amount_cents: row.amount_cents,
            currency: row.currency,
            reference: row.reference,
            failure_code: row.failure_code,
            failure_message: row.failure_message,
            processed_at: row.processed_at,
            metadata: from_json_text(&row.metadata)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert_payment(payment: NewOrderPayment, conn: &mut SqliteConnection) -> Result<OrderPayment, StoreError> {
    let now = Utc::now();
    let row: OrderPaymentRow = sqlx::query_as(
        r#"
            INSERT INTO order_payments (
                order_id,
                provider,
                method,
                intent_id,
                status,
                amount_cents,
                currency,
                metadata,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING *;
        "#,
    )
    .bind(payment.order_id)
    .bind(&payment.provider)
    .bind(&payment.method)
    .bind(&payment.intent_id)
    .bind(PaymentStatus::Pending)
    .bind(payment.amount_cents)
    .bind(&payment.currency)
    .bind(to_json_text(&payment.metadata)?)
    .bind(now)
    .fetch_one(conn)
    .await?;
    let payment = OrderPayment::try_from(row)?;
    debug!("🗃️ Payment {} ({}) opened for order {}", payment.id, payment.provider, payment.order_id);
    Ok(payment)
}

pub async fn fetch_payment(payment_id: i64, conn: &mut SqliteConnection) -> Result<Option<OrderPayment>, StoreError> {
    let row: Option<OrderPaymentRow> =
        sqlx::query_as("SELECT * FROM order_payments WHERE id = $1").bind(payment_id).fetch_optional(conn).await?;
    row.map(OrderPayment::try_from).transpose()
}

pub async fn fetch_payments_for_orders(
    order_ids: &[i64],
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderPayment>, StoreError> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM order_payments WHERE order_id IN (");
    let mut ids = builder.separated(", ");
    for id in order_ids {
        ids.push_bind(*id);
    }
    builder.push(") ORDER BY id");
    let rows: Vec<OrderPaymentRow> = builder.build_query_as().fetch_all(conn).await?;
    rows.into_iter().map(OrderPayment::try_from).collect()
}

/// Patches a payment row. A status change must be a legal forward transition; sending the current status again is
/// treated as "no status change". Metadata is merged into what is already stored.
pub async fn update_payment_record(
    payment_id: i64,
    update: PaymentRecordUpdate,
    conn: &mut SqliteConnection,
) -> Result<OrderPayment, StoreError> {
    let current = fetch_payment(payment_id, conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Payment {payment_id}")))?;
    let status = match update.status {
        Some(to) if to != current.status => {
            if !payment_allows_transition(current.status, to) {
                return Err(StoreError::InvalidTransition(format!(
                    "Payment {payment_id} cannot go from {} to {to}",
                    current.status
                )));
            }
            Some(to)
        },
        _ => None,
    };
    let mut metadata = current.metadata;
    merge_metadata(&mut metadata, update.metadata);
    let row: OrderPaymentRow = sqlx::query_as(
        r#"
            UPDATE order_payments SET
                status = COALESCE($1, status),
                reference = COALESCE($2, reference),
                failure_code = COALESCE($3, failure_code),
                failure_message = COALESCE($4, failure_message),
                processed_at = COALESCE($5, processed_at),
                metadata = $6,
                updated_at = $7
            WHERE id = $8
            RETURNING *;
        "#,
    )
    .bind(status)
    .bind(update.reference)
    .bind(update.failure_code)
    .bind(update.failure_message)
    .bind(update.processed_at)
    .bind(to_json_text(&metadata)?)
    .bind(Utc::now())
    .bind(payment_id)
    .fetch_one(conn)
    .await?;
    let payment = OrderPayment::try_from(row)?;
    if let Some(s) = status {
        debug!("🗃️ Payment {payment_id} moved from {} to {s}", current.status);
    }
    Ok(payment)
}
