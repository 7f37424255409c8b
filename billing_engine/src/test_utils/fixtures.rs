//! Seed data for tests.
//!
//! | id | user              | balance  |
//! |----|-------------------|----------|
//! | 1  | alice@example.com | 100.00   |
//! | 2  | bob@example.com   | 5.00     |
//! | 99 | admin@example.com | none     |
//!
//! Plans: `1` Basic (26.00 CNY / month, with a yearly option `1` and a hidden option `2`), `2` Hourly (1.00, no
//! currency), `3` Trial (free), `4` Legacy (archived). Channels: `alipay` (enabled, webhook secret `whsec_test`) and
//! `stripe` (disabled). Coupons: `SAVE10`, `FIVE`, `ONCE`, `EXPIRED` and `BIGSPEND`.
use sqlx::Executor;

use crate::{Caller, SqliteDatabase};

pub const SEED_SQL: &str = include_str!("seed.sql");
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const ADMIN: i64 = 99;

pub const BASIC_PLAN: i64 = 1;
pub const HOURLY_PLAN: i64 = 2;
pub const TRIAL_PLAN: i64 = 3;
pub const LEGACY_PLAN: i64 = 4;
pub const YEARLY_OPTION: i64 = 1;

pub async fn seed_billing_data(db: &SqliteDatabase) {
    db.pool().execute(SEED_SQL).await.expect("Error seeding test data");
}

pub fn alice() -> Caller {
    Caller::new(ALICE, "alice@example.com")
}

pub fn bob() -> Caller {
    Caller::new(BOB, "bob@example.com")
}

pub fn admin() -> Caller {
    Caller::new(ADMIN, "admin@example.com").with_role("admin")
}
