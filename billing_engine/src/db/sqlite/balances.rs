use billing_common::Cents;
use chrono::{DateTime, Utc};
use log::*;
use sqlx::{FromRow, SqliteConnection};

use super::{from_json_text, to_json_text};
use crate::{
    db::errors::StoreError,
    db_types::{BalanceTransaction, BalanceTxType, NewBalanceTransaction, UserBalance},
};

#[derive(FromRow)]
struct UserBalanceRow {
    user_id: i64,
    balance_cents: Cents,
    currency: String,
    updated_at: DateTime<Utc>,
}

impl From<UserBalanceRow> for UserBalance {
    fn from(row: UserBalanceRow) -> Self {
        UserBalance {
            user_id: row.user_id,
            balance_cents: row.balance_cents,
            currency: row.currency,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct BalanceTransactionRow {
    id: i64,
    user_id: i64,
    tx_type: BalanceTxType,
    amount_cents: Cents,
    balance_after_cents: Cents,
    reference: Option<String>,
    description: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BalanceTransactionRow> for BalanceTransaction {
    type Error = StoreError;

    fn try_from(row: BalanceTransactionRow) -> Result<Self, Self::Error> {
        Ok(BalanceTransaction {
            id: row.id,
            user_id: row.user_id,
            tx_type: row.tx_type,
            amount_cents: row.amount_cents,
            balance_after_cents: row.balance_after_cents,
            reference: row.reference,
            description: row.description,
            metadata: from_json_text(&row.metadata)?,
            created_at: row.created_at,
        })
    }
}

pub async fn fetch_balance(user_id: i64, conn: &mut SqliteConnection) -> Result<Option<UserBalance>, StoreError> {
    let row: Option<UserBalanceRow> =
        sqlx::query_as("SELECT * FROM user_balances WHERE user_id = $1").bind(user_id).fetch_optional(conn).await?;
    Ok(row.map(UserBalance::from))
}

/// Returns the balance row for the user, creating a zero balance in `currency` if there is none yet. Fails with
/// `InvalidReference` if the user does not exist.
pub async fn fetch_or_create_balance(
    user_id: i64,
    currency: &str,
    conn: &mut SqliteConnection,
) -> Result<UserBalance, StoreError> {
    if let Some(balance) = fetch_balance(user_id, conn).await? {
        return Ok(balance);
    }
    let row: UserBalanceRow = sqlx::query_as(
        "INSERT INTO user_balances (user_id, balance_cents, currency, updated_at) VALUES ($1, 0, $2, $3) RETURNING *",
    )
    .bind(user_id)
    .bind(currency)
    .bind(Utc::now())
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Created balance for user {user_id} in {currency}");
    Ok(row.into())
}

/// Applies the signed amount in `tx` to the user's balance and appends the matching ledger row.
pub async fn adjust_balance(
    user_id: i64,
    tx: NewBalanceTransaction,
    conn: &mut SqliteConnection,
) -> Result<(UserBalance, BalanceTransaction), StoreError> {
    let current = fetch_balance(user_id, conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Balance for user {user_id}")))?;
    let new_balance = current.balance_cents.checked_add(tx.amount_cents).ok_or_else(|| {
        StoreError::InvalidArgument(format!("Adjusting the balance of user {user_id} by {} overflows", tx.amount_cents))
    })?;
    if new_balance.value() < 0 {
        return Err(StoreError::InsufficientBalance { required: -tx.amount_cents, available: current.balance_cents });
    }
    let now = Utc::now();
    let balance: UserBalanceRow = sqlx::query_as(
        "UPDATE user_balances SET balance_cents = $1, updated_at = $2 WHERE user_id = $3 RETURNING *",
    )
    .bind(new_balance)
    .bind(now)
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;
    let row: BalanceTransactionRow = sqlx::query_as(
        r#"
            INSERT INTO balance_transactions (
                user_id,
                tx_type,
                amount_cents,
                balance_after_cents,
                reference,
                description,
                metadata,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(user_id)
    .bind(tx.tx_type)
    .bind(tx.amount_cents)
    .bind(new_balance)
    .bind(tx.reference)
    .bind(tx.description)
    .bind(to_json_text(&tx.metadata)?)
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Balance of user {user_id} adjusted by {} ({}). Now {new_balance}", tx.amount_cents, tx.tx_type);
    Ok((balance.into(), BalanceTransaction::try_from(row)?))
}

pub async fn fetch_balance_transactions(
    user_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<BalanceTransaction>, StoreError> {
    let rows: Vec<BalanceTransactionRow> =
        sqlx::query_as("SELECT * FROM balance_transactions WHERE user_id = $1 ORDER BY id")
            .bind(user_id)
            .fetch_all(conn)
            .await?;
    rows.into_iter().map(BalanceTransaction::try_from).collect()
}
