//! # SQLite backend
//!
//! Low-level queries are plain functions that accept a `&mut SqliteConnection`, so they can run against a pooled
//! connection or inside a transaction without change. [`SqliteDatabase`] and [`SqliteTransaction`] wire them up to
//! the storage traits.
//!
//! SQLite has no row locks. Every write transaction instead bumps the single `write_guard` row as its first statement,
//! taking the database write lock for the remainder of the transaction. Two flows touching the same order, balance or
//! coupon therefore run one after the other, which is the guarantee row locks would give.
use std::{str::FromStr, time::Duration};

use log::*;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

use crate::db::errors::StoreError;

mod db;
mod errors;

pub mod audit;
pub mod balances;
pub mod catalog;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod subscriptions;

pub use db::{SqliteDatabase, SqliteTransaction};

pub const SQLITE_DB_URL: &str = "sqlite://data/billing.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    debug!("🗃️ Connected to {url} with up to {max_connections} connections");
    Ok(pool)
}

pub(crate) fn to_json_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json_text<T: DeserializeOwned + Default>(text: &str) -> Result<T, StoreError> {
    if text.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(text)?)
}
