#![allow(dead_code)]
//! A migrated, seeded scratch database per test, and a gateway transport that answers from a script.
//!
//! The seed is the same one the `test_utils` fixtures load; see `src/test_utils/fixtures.rs` for what it contains.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use billing_common::Cents;
use billing_engine::{
    events::EventProducers,
    gateway::{GatewayEngine, GatewayError, GatewayRequest, GatewayResponse, HttpTransport},
    Caller,
    OrderFlowApi,
    SqliteDatabase,
};
use chrono::Utc;
use serde_json::Value;
use sqlx::Executor;
use tempfile::TempDir;

pub const SEED_SQL: &str = include_str!("../../src/test_utils/seed.sql");
pub const WEBHOOK_SECRET: &str = "whsec_test";

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const ADMIN: i64 = 99;

pub const BASIC_PLAN: i64 = 1;
pub const HOURLY_PLAN: i64 = 2;
pub const TRIAL_PLAN: i64 = 3;
pub const LEGACY_PLAN: i64 = 4;
pub const YEARLY_OPTION: i64 = 1;
pub const HIDDEN_OPTION: i64 = 2;
pub const DAILY_OPTION: i64 = 3;

pub type TestApi = OrderFlowApi<SqliteDatabase, ScriptedTransport>;

pub fn alice() -> Caller {
    Caller::new(ALICE, "alice@example.com")
}

pub fn bob() -> Caller {
    Caller::new(BOB, "bob@example.com")
}

pub fn admin() -> Caller {
    Caller::new(ADMIN, "admin@example.com").with_role("admin")
}

//--------------------------------------   ScriptedTransport  ---------------------------------------------------------
type Reply = Result<GatewayResponse, GatewayError>;

/// Answers each request with the next scripted reply whose URL prefix matches. Every request is recorded.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<Vec<(String, VecDeque<Reply>)>>>,
    requests: Arc<Mutex<Vec<GatewayRequest>>>,
}

impl ScriptedTransport {
    pub fn reply(&self, url_prefix: &str, status: u16, body: Value) {
        self.push(url_prefix, Ok(GatewayResponse { status, body: body.to_string() }));
    }

    pub fn fail(&self, url_prefix: &str, error: GatewayError) {
        self.push(url_prefix, Err(error));
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, url_prefix: &str, reply: Reply) {
        let mut replies = self.replies.lock().unwrap();
        match replies.iter_mut().find(|(prefix, _)| prefix == url_prefix) {
            Some((_, queue)) => queue.push_back(reply),
            None => replies.push((url_prefix.to_string(), VecDeque::from([reply]))),
        }
    }
}

impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        replies
            .iter_mut()
            .find(|(prefix, queue)| request.url.starts_with(prefix.as_str()) && !queue.is_empty())
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| Err(GatewayError::Transport(format!("no scripted reply for {}", request.url))))
    }
}

//--------------------------------------      TestContext      --------------------------------------------------------
pub struct TestContext {
    pub api: TestApi,
    pub transport: ScriptedTransport,
    _dir: TempDir,
}

pub async fn setup() -> TestContext {
    setup_with(EventProducers::default()).await
}

pub async fn setup_with(producers: EventProducers) -> TestContext {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().expect("Error creating scratch directory");
    let url = format!("sqlite://{}", dir.path().join("billing.db").display());
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    db.migrate().await.expect("Error running migrations");
    db.pool().execute(SEED_SQL).await.expect("Error seeding database");
    let transport = ScriptedTransport::default();
    let api = OrderFlowApi::new(db, GatewayEngine::new(transport.clone()), producers);
    TestContext { api, transport, _dir: dir }
}

impl TestContext {
    pub fn db(&self) -> &SqliteDatabase {
        self.api.db()
    }

    pub async fn set_balance(&self, user_id: i64, cents: i64) {
        sqlx::query(
            "INSERT INTO user_balances (user_id, balance_cents, currency, updated_at) VALUES ($1, $2, 'CNY', $3) ON \
             CONFLICT (user_id) DO UPDATE SET balance_cents = excluded.balance_cents",
        )
        .bind(user_id)
        .bind(cents)
        .bind(Utc::now())
        .execute(self.db().pool())
        .await
        .expect("Error setting balance");
    }

    pub async fn balance(&self, user_id: i64) -> Cents {
        let (cents,): (i64,) = sqlx::query_as("SELECT balance_cents FROM user_balances WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.db().pool())
            .await
            .expect("Error reading balance");
        Cents::from(cents)
    }

    /// Adds an active, visible CNY plan billed per day and returns its id.
    pub async fn add_plan(&self, name: &str, price_cents: i64, days: i64, traffic: i64, devices: i64) -> i64 {
        self.add_plan_in("CNY", name, price_cents, days, traffic, devices).await
    }

    pub async fn add_plan_in(
        &self,
        currency: &str,
        name: &str,
        price_cents: i64,
        days: i64,
        traffic: i64,
        devices: i64,
    ) -> i64 {
        sqlx::query(
            "INSERT INTO plans (name, slug, price_cents, currency, duration_unit, duration_value, traffic_limit_bytes, \
             devices_limit) VALUES ($1, $2, $3, $4, 'day', $5, $6, $7)",
        )
        .bind(name)
        .bind(name.to_ascii_lowercase())
        .bind(price_cents)
        .bind(currency)
        .bind(days)
        .bind(traffic)
        .bind(devices)
        .execute(self.db().pool())
        .await
        .expect("Error adding plan")
        .last_insert_rowid()
    }

    pub async fn count(&self, sql: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(sql).fetch_one(self.db().pool()).await.expect("Error counting rows");
        n
    }

    /// Scripts a successful initiate on the `alipay` channel.
    pub fn expect_initiate(&self) {
        self.transport.reply(
            "https://pay.test/create",
            200,
            serde_json::json!({"data": {"pay_url": "https://pay.test/redirect", "reference": "ref-001"}}),
        );
    }
}
