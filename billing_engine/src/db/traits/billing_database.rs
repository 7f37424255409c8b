use crate::{
    db::{errors::StoreError, traits::BillingTransaction},
    db_types::{
        AuditEntry,
        BalanceTransaction,
        CouponRedemption,
        Order,
        OrderItem,
        OrderPayment,
        OrderRefund,
        PaymentChannel,
        Plan,
        PlanBillingOption,
        Subscription,
        UserBalance,
    },
};

/// Read-side access to the billing store, plus the entry point for write transactions.
///
/// Reads here run outside any transaction and may observe state that is immediately superseded. Flows that act on
/// what they read must re-read inside a [`BillingTransaction`].
#[allow(async_fn_in_trait)]
pub trait BillingDatabase: Clone {
    type Tx: BillingTransaction;

    /// The URL of the database
    fn url(&self) -> &str;

    /// Opens a write transaction. The backend's write lock is held from this point on.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, StoreError>;

    async fn fetch_order_by_idempotency_key(&self, user_id: i64, key: &str) -> Result<Option<Order>, StoreError>;

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, StoreError>;

    /// Payments for all the given orders, in insertion order.
    async fn fetch_payments_for_orders(&self, order_ids: &[i64]) -> Result<Vec<OrderPayment>, StoreError>;

    /// Refunds for all the given orders, in insertion order.
    async fn fetch_refunds_for_orders(&self, order_ids: &[i64]) -> Result<Vec<OrderRefund>, StoreError>;

    async fn fetch_payment(&self, payment_id: i64) -> Result<Option<OrderPayment>, StoreError>;

    async fn fetch_redemptions_for_order(&self, order_id: i64) -> Result<Vec<CouponRedemption>, StoreError>;

    async fn fetch_plan(&self, plan_id: i64) -> Result<Option<Plan>, StoreError>;

    async fn fetch_billing_option(&self, option_id: i64) -> Result<Option<PlanBillingOption>, StoreError>;

    /// Channel codes are matched case-insensitively.
    async fn fetch_channel(&self, code: &str) -> Result<Option<PaymentChannel>, StoreError>;

    async fn fetch_balance(&self, user_id: i64) -> Result<Option<UserBalance>, StoreError>;

    async fn fetch_balance_transactions(&self, user_id: i64) -> Result<Vec<BalanceTransaction>, StoreError>;

    async fn fetch_subscriptions_for_user(&self, user_id: i64) -> Result<Vec<Subscription>, StoreError>;

    async fn fetch_audit_log(&self, resource_type: &str, resource_id: &str) -> Result<Vec<AuditEntry>, StoreError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
