use chrono::{DateTime, Utc};

use crate::{
    db::errors::StoreError,
    db_types::{
        BalanceTransaction,
        Coupon,
        CouponRedemption,
        InsertOrderResult,
        Metadata,
        NewAuditEntry,
        NewBalanceTransaction,
        NewCouponRedemption,
        NewOrder,
        NewOrderItem,
        NewOrderPayment,
        NewOrderRefund,
        NewSubscription,
        Order,
        OrderItem,
        OrderPayment,
        OrderRefund,
        OrderStatus,
        PaymentRecordUpdate,
        PaymentStateUpdate,
        RedemptionStatus,
        Subscription,
        SubscriptionTemplate,
        SubscriptionTerms,
        UserBalance,
    },
};

/// A unit of atomic work against the billing store.
///
/// Every method runs inside the same backend transaction. Nothing is visible to other connections until
/// [`BillingTransaction::commit`] returns. Status writes are checked against the rules in
/// [`crate::state_machine`] and fail with [`StoreError::InvalidTransition`] when they would break them.
#[allow(async_fn_in_trait)]
pub trait BillingTransaction {
    //------------------------------------------   Orders   ---------------------------------------------------------
    /// Inserts a new order with status `PendingPayment` and payment status `Pending`.
    async fn insert_order(&mut self, order: NewOrder) -> Result<InsertOrderResult, StoreError>;

    async fn insert_order_items(
        &mut self,
        order_id: i64,
        items: &[NewOrderItem],
    ) -> Result<Vec<OrderItem>, StoreError>;

    /// Loads an order. Since the transaction holds the write lock, the row cannot change until commit.
    async fn fetch_order_for_update(&mut self, order_id: i64) -> Result<Option<Order>, StoreError>;

    async fn fetch_order_by_idempotency_key(&mut self, user_id: i64, key: &str)
        -> Result<Option<Order>, StoreError>;

    async fn fetch_order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>, StoreError>;

    /// Compound update of the settlement columns. `paid_at` is never cleared once set.
    async fn update_payment_state(&mut self, order_id: i64, update: PaymentStateUpdate)
        -> Result<Order, StoreError>;

    /// Moves the order to `status`, stamping `cancelled_at` or `refunded_at` with `at` when applicable.
    async fn update_order_status(
        &mut self,
        order_id: i64,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError>;

    /// Shallow-merges `patch` into the order's metadata.
    async fn merge_order_metadata(&mut self, order_id: i64, patch: Metadata) -> Result<Order, StoreError>;

    async fn set_payment_intent(&mut self, order_id: i64, intent_id: &str) -> Result<Order, StoreError>;

    //------------------------------------------  Payments  ---------------------------------------------------------
    /// Appends a payment attempt with status `Pending`.
    async fn insert_payment(&mut self, payment: NewOrderPayment) -> Result<OrderPayment, StoreError>;

    async fn fetch_payment(&mut self, payment_id: i64) -> Result<Option<OrderPayment>, StoreError>;

    async fn fetch_payments_for_order(&mut self, order_id: i64) -> Result<Vec<OrderPayment>, StoreError>;

    /// Applies a forward-only status change and/or a metadata patch to a payment.
    async fn update_payment_record(
        &mut self,
        payment_id: i64,
        update: PaymentRecordUpdate,
    ) -> Result<OrderPayment, StoreError>;

    //------------------------------------------  Refunds   ---------------------------------------------------------
    /// Appends a refund and increments the order's `refunded_cents`. Fails with `InvalidArgument` when the amount is
    /// not positive or exceeds what is left to refund. Does not change the order status.
    async fn add_refund(&mut self, order_id: i64, refund: NewOrderRefund) -> Result<(Order, OrderRefund), StoreError>;

    //------------------------------------------  Coupons   ---------------------------------------------------------
    async fn fetch_coupon_for_update(&mut self, code: &str) -> Result<Option<Coupon>, StoreError>;

    /// Counts redemptions that are not `Released`, optionally restricted to one user.
    async fn count_active_redemptions(&mut self, coupon_id: i64, user_id: Option<i64>) -> Result<i64, StoreError>;

    async fn insert_redemption(&mut self, redemption: NewCouponRedemption) -> Result<CouponRedemption, StoreError>;

    async fn fetch_redemptions_for_order(&mut self, order_id: i64) -> Result<Vec<CouponRedemption>, StoreError>;

    /// Moves every redemption of the order whose status is in `from` to `to`. Returns the number of rows changed.
    async fn set_redemption_status(
        &mut self,
        order_id: i64,
        from: &[RedemptionStatus],
        to: RedemptionStatus,
    ) -> Result<u64, StoreError>;

    //------------------------------------------  Balances  ---------------------------------------------------------
    /// Returns the user's balance row, creating an empty one in `currency` on first use.
    async fn fetch_or_create_balance(&mut self, user_id: i64, currency: &str) -> Result<UserBalance, StoreError>;

    /// Applies a signed adjustment and appends the ledger row. Fails with `InsufficientBalance` if the result would
    /// be negative.
    async fn adjust_balance(
        &mut self,
        user_id: i64,
        tx: NewBalanceTransaction,
    ) -> Result<(UserBalance, BalanceTransaction), StoreError>;

    //----------------------------------------  Subscriptions  -------------------------------------------------------
    async fn fetch_subscription(&mut self, subscription_id: i64) -> Result<Option<Subscription>, StoreError>;

    /// All of the user's subscriptions, oldest first.
    async fn fetch_subscriptions_for_user(&mut self, user_id: i64) -> Result<Vec<Subscription>, StoreError>;

    /// Published templates, or drafts when nothing is published.
    async fn fetch_subscription_templates(&mut self) -> Result<Vec<SubscriptionTemplate>, StoreError>;

    async fn insert_subscription(&mut self, subscription: NewSubscription) -> Result<Subscription, StoreError>;

    async fn renew_subscription(
        &mut self,
        subscription_id: i64,
        terms: SubscriptionTerms,
    ) -> Result<Subscription, StoreError>;

    /// Disables every active subscription of the user except `keep_id`. Returns the number disabled.
    async fn disable_other_active(&mut self, user_id: i64, keep_id: i64) -> Result<u64, StoreError>;

    //------------------------------------------   Audit    ---------------------------------------------------------
    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}
