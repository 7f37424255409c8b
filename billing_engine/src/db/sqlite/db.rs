//! `SqliteDatabase` is the concrete billing store backend. It implements [`BillingDatabase`] for reads and hands out
//! [`SqliteTransaction`]s, which implement [`BillingTransaction`], for everything that writes.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::{info, trace};
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::{audit, balances, catalog, coupons, new_pool, orders, payments, subscriptions};
use crate::{
    db::{
        errors::StoreError,
        traits::{BillingDatabase, BillingTransaction},
    },
    db_types::*,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object with a connection pool of at most `max_connections` connections.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies any pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./src/db/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Driver(format!("Migration failed. {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }
}

impl BillingDatabase for SqliteDatabase {
    type Tx = SqliteTransaction;

    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        SqliteTransaction::open(&self.pool).await
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(order_id, &mut conn).await
    }

    async fn fetch_order_by_idempotency_key(&self, user_id: i64, key: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_idempotency_key(user_id, key, &mut conn).await
    }

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_items(order_id, &mut conn).await
    }

    async fn fetch_payments_for_orders(&self, order_ids: &[i64]) -> Result<Vec<OrderPayment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payments_for_orders(order_ids, &mut conn).await
    }

    async fn fetch_refunds_for_orders(&self, order_ids: &[i64]) -> Result<Vec<OrderRefund>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_refunds_for_orders(order_ids, &mut conn).await
    }

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<OrderPayment>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_payment(payment_id, &mut conn).await
    }

    async fn fetch_redemptions_for_order(&self, order_id: i64) -> Result<Vec<CouponRedemption>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        coupons::fetch_redemptions_for_order(order_id, &mut conn).await
    }

    async fn fetch_plan(&self, plan_id: i64) -> Result<Option<Plan>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_plan(plan_id, &mut conn).await
    }

    async fn fetch_billing_option(&self, option_id: i64) -> Result<Option<PlanBillingOption>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_billing_option(option_id, &mut conn).await
    }

    async fn fetch_channel(&self, code: &str) -> Result<Option<PaymentChannel>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        catalog::fetch_channel(code, &mut conn).await
    }

    async fn fetch_balance(&self, user_id: i64) -> Result<Option<UserBalance>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        balances::fetch_balance(user_id, &mut conn).await
    }

    async fn fetch_balance_transactions(&self, user_id: i64) -> Result<Vec<BalanceTransaction>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        balances::fetch_balance_transactions(user_id, &mut conn).await
    }

    async fn fetch_subscriptions_for_user(&self, user_id: i64) -> Result<Vec<Subscription>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        subscriptions::fetch_subscriptions_for_user(user_id, &mut conn).await
    }

    async fn fetch_audit_log(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        audit::fetch_audit_log(resource_type, resource_id, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

//--------------------------------------   SqliteTransaction   ------------------------------------------------------
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTransaction {
    /// Begins a transaction and takes the database write lock straight away.
    async fn open(pool: &SqlitePool) -> Result<Self, StoreError> {
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE write_guard SET generation = generation + 1 WHERE id = 1").execute(&mut *tx).await?;
        trace!("🗃️ Write transaction opened");
        Ok(Self { tx })
    }
}

impl BillingTransaction for SqliteTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<InsertOrderResult, StoreError> {
        orders::insert_order(order, &mut self.tx).await
    }

    async fn insert_order_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, StoreError> {
        orders::insert_order_items(order_id, items, &mut self.tx).await
    }

    async fn fetch_order_for_update(&mut self, order_id: i64) -> Result<Option<Order>, StoreError> {
        orders::fetch_order(order_id, &mut self.tx).await
    }

    async fn fetch_order_by_idempotency_key(
        &mut self,
        user_id: i64,
        key: &str,
    ) -> Result<Option<Order>, StoreError> {
        orders::fetch_order_by_idempotency_key(user_id, key, &mut self.tx).await
    }

    async fn fetch_order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>, StoreError> {
        orders::fetch_order_items(order_id, &mut self.tx).await
    }

    async fn update_payment_state(
        &mut self,
        order_id: i64,
        update: PaymentStateUpdate,
    ) -> Result<Order, StoreError> {
        orders::update_payment_state(order_id, update, &mut self.tx).await
    }

    async fn update_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        orders::update_order_status(order_id, status, at, &mut self.tx).await
    }

    async fn merge_order_metadata(&mut self, order_id: i64, patch: Metadata) -> Result<Order, StoreError> {
        orders::merge_order_metadata(order_id, patch, &mut self.tx).await
    }

    async fn set_payment_intent(&mut self, order_id: i64, intent_id: &str) -> Result<Order, StoreError> {
        orders::set_payment_intent(order_id, intent_id, &mut self.tx).await
    }

    async fn insert_payment(&mut self, payment: NewOrderPayment) -> Result<OrderPayment, StoreError> {
        payments::insert_payment(payment, &mut self.tx).await
    }

    async fn fetch_payment(&mut self, payment_id: i64) -> Result<Option<OrderPayment>, StoreError> {
        payments::fetch_payment(payment_id, &mut self.tx).await
    }

    async fn fetch_payments_for_order(&mut self, order_id: i64) -> Result<Vec<OrderPayment>, StoreError> {
        payments::fetch_payments_for_orders(&[order_id], &mut self.tx).await
    }

    async fn update_payment_record(
        &mut self,
        payment_id: i64,
        update: PaymentRecordUpdate,
    ) -> Result<OrderPayment, StoreError> {
        payments::update_payment_record(payment_id, update, &mut self.tx).await
    }

    async fn add_refund(&mut self, order_id: i64, refund: NewOrderRefund) -> Result<(Order, OrderRefund), StoreError> {
        orders::add_refund(order_id, refund, &mut self.tx).await
    }

    async fn fetch_coupon_for_update(&mut self, code: &str) -> Result<Option<Coupon>, StoreError> {
        coupons::fetch_coupon_by_code(code, &mut self.tx).await
    }

    async fn count_active_redemptions(&mut self, coupon_id: i64, user_id: Option<i64>) -> Result<i64, StoreError> {
        coupons::count_active_redemptions(coupon_id, user_id, &mut self.tx).await
    }

    async fn insert_redemption(&mut self, redemption: NewCouponRedemption) -> Result<CouponRedemption, StoreError> {
        coupons::insert_redemption(redemption, &mut self.tx).await
    }

    async fn fetch_redemptions_for_order(&mut self, order_id: i64) -> Result<Vec<CouponRedemption>, StoreError> {
        coupons::fetch_redemptions_for_order(order_id, &mut self.tx).await
    }

    async fn set_redemption_status(
        &mut self,
        order_id: i64,
        from: &[RedemptionStatus],
        to: RedemptionStatus,
    ) -> Result<u64, StoreError> {
        coupons::set_redemption_status(order_id, from, to, &mut self.tx).await
    }

    async fn fetch_or_create_balance(&mut self, user_id: i64, currency: &str) -> Result<UserBalance, StoreError> {
        balances::fetch_or_create_balance(user_id, currency, &mut self.tx).await
    }

    async fn adjust_balance(
        &mut self,
        user_id: i64,
        tx: NewBalanceTransaction,
    ) -> Result<(UserBalance, BalanceTransaction), StoreError> {
        balances::adjust_balance(user_id, tx, &mut self.tx).await
    }

    async fn fetch_subscription(&mut self, subscription_id: i64) -> Result<Option<Subscription>, StoreError> {
        subscriptions::fetch_subscription(subscription_id, &mut self.tx).await
    }

    async fn fetch_subscriptions_for_user(&mut self, user_id: i64) -> Result<Vec<Subscription>, StoreError> {
        subscriptions::fetch_subscriptions_for_user(user_id, &mut self.tx).await
    }

    async fn fetch_subscription_templates(&mut self) -> Result<Vec<SubscriptionTemplate>, StoreError> {
        subscriptions::fetch_subscription_templates(&mut self.tx).await
    }

    async fn insert_subscription(&mut self, subscription: NewSubscription) -> Result<Subscription, StoreError> {
        subscriptions::insert_subscription(subscription, &mut self.tx).await
    }

    async fn renew_subscription(
        &mut self,
        subscription_id: i64,
        terms: SubscriptionTerms,
    ) -> Result<Subscription, StoreError> {
        subscriptions::renew_subscription(subscription_id, terms, &mut self.tx).await
    }

    async fn disable_other_active(&mut self, user_id: i64, keep_id: i64) -> Result<u64, StoreError> {
        subscriptions::disable_other_active(user_id, keep_id, &mut self.tx).await
    }

    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<(), StoreError> {
        audit::append_audit(entry, &mut self.tx).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        trace!("🗃️ Write transaction committed");
        Ok(())
    }
}
