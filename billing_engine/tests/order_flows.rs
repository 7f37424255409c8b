use billing_common::Cents;
use billing_engine::{
    db_types::{
        BalanceTxType,
        ItemType,
        Metadata,
        NewBalanceTransaction,
        OrderStatus,
        PaymentMethod,
        PaymentStatus,
        RedemptionStatus,
    },
    gateway::{GatewayError, HttpBody},
    order_objects::CreateOrderRequest,
    BillingDatabase,
    BillingError,
    BillingTransaction,
    StoreError,
};
use serde_json::json;
use support::*;

mod support;

#[tokio::test]
async fn balance_purchase_settles_immediately() {
    let ctx = setup().await;
    ctx.set_balance(ALICE, 5000).await;
    let plan = ctx.add_plan("Starter", 1500, 30, 1024, 2).await;

    let result = ctx
        .api
        .create_order(&alice(), CreateOrderRequest::new(plan).with_quantity(1).with_method("balance"))
        .await
        .expect("Error creating order");
    let order = &result.order.order;
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Succeeded);
    assert_eq!(order.payment_method, PaymentMethod::Balance);
    assert!(order.paid_at.is_some());
    assert_eq!(order.total_cents, Cents::from(1500));
    assert!(result.order.payments.is_empty());
    assert!(!result.replayed);
    assert_eq!(result.balance.balance_cents, Cents::from(3500));
    let ledger = result.balance_transaction.as_ref().expect("a purchase ledger row");
    assert_eq!(ledger.tx_type, BalanceTxType::Purchase);
    assert_eq!(ledger.amount_cents, Cents::from(-1500));
    assert_eq!(ledger.balance_after_cents, Cents::from(3500));
    assert_eq!(ctx.balance(ALICE).await, Cents::from(3500));

    let subs = ctx.db().fetch_subscriptions_for_user(ALICE).await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].plan_name, "Starter");
    assert_eq!(subs[0].traffic_total_bytes, 1024);
    assert_eq!(subs[0].devices_limit, 2);
    assert_eq!(subs[0].template_id, Some(1));
    let paid_at = order.paid_at.unwrap();
    assert_eq!(subs[0].expires_at, Some(paid_at + chrono::Duration::days(30)));

    let detail = ctx.api.order_detail(&alice(), order.id).await.unwrap();
    assert_eq!(detail.order.metadata_i64("subscription_id"), Some(subs[0].id));
    let audit = ctx.db().fetch_audit_log("order", &order.id.to_string()).await.unwrap();
    assert!(audit.iter().any(|a| a.action == "order.create"));
}

#[tokio::test]
async fn balance_purchases_stay_in_the_balance_currency() {
    let ctx = setup().await;
    let plan = ctx.add_plan_in("USD", "Overseas", 1500, 30, 1024, 2).await;
    let err = ctx.api.create_order(&alice(), CreateOrderRequest::new(plan).with_method("balance")).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");
    assert_eq!(ctx.balance(ALICE).await, Cents::from(10000));
    assert_eq!(ctx.count("SELECT COUNT(*) FROM orders").await, 0);
    assert_eq!(ctx.count("SELECT COUNT(*) FROM balance_transactions").await, 0);
}

#[tokio::test]
async fn balance_adjustments_do_not_overflow() {
    let ctx = setup().await;
    ctx.set_balance(ALICE, i64::MAX - 10).await;
    let mut tx = ctx.db().begin().await.unwrap();
    let credit = NewBalanceTransaction {
        tx_type: BalanceTxType::Refund,
        amount_cents: Cents::from(100),
        reference: None,
        description: None,
        metadata: Metadata::new(),
    };
    let err = tx.adjust_balance(ALICE, credit).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)), "{err}");
    drop(tx);
    assert_eq!(ctx.balance(ALICE).await, Cents::from(i64::MAX - 10));
}

#[tokio::test]
async fn external_order_is_initiated_after_commit() {
    let ctx = setup().await;
    ctx.expect_initiate();
    let request = CreateOrderRequest::new(BASIC_PLAN)
        .with_method("external")
        .with_channel("alipay")
        .with_return_url("https://example.com/return");
    let result = ctx.api.create_order(&alice(), request).await.expect("Error creating order");
    assert!(result.payment_error.is_none());
    let order = &result.order.order;
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.paid_at.is_none());
    assert_eq!(order.payment_intent_id.as_deref(), Some(format!("alipay-{}", order.number).as_str()));
    assert_eq!(result.order.payments.len(), 1);
    let payment = &result.order.payments[0];
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.provider, "alipay");
    assert_eq!(payment.amount_cents, Cents::from(2600));
    assert_eq!(payment.metadata["pay_url"], json!("https://pay.test/redirect"));
    assert_eq!(payment.reference.as_deref(), Some("ref-001"));
    assert_eq!(ctx.balance(ALICE).await, Cents::from(10000));
    assert!(ctx.db().fetch_subscriptions_for_user(ALICE).await.unwrap().is_empty());

    let requests = ctx.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    match &requests[0].body {
        Some(HttpBody::Json(body)) => {
            assert_eq!(body["out_trade_no"], json!(order.number));
            assert_eq!(body["total_amount"], json!("26.00"));
            assert_eq!(body["notify"], json!("https://panel.test/api/v1/payments/webhook/alipay"));
        },
        other => panic!("Unexpected request body {other:?}"),
    }
}

#[tokio::test]
async fn initiate_failure_keeps_the_order() {
    let ctx = setup().await;
    ctx.transport.fail("https://pay.test/create", GatewayError::Timeout);
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("alipay");
    let result = ctx.api.create_order(&alice(), request).await.expect("The order should survive the failure");
    assert!(result.payment_error.is_some());
    let order_id = result.order.order.id;
    let detail = ctx.api.order_detail(&alice(), order_id).await.unwrap();
    assert_eq!(detail.order.status, OrderStatus::PendingPayment);
    assert_eq!(detail.payments.len(), 1);
    assert_eq!(detail.payments[0].status, PaymentStatus::Pending);
    assert!(detail.payments[0].metadata.contains_key("initiate_error"));
    assert!(!detail.payments[0].metadata.contains_key("pay_url"));
}

#[tokio::test]
async fn repeated_idempotency_key_returns_the_first_order() {
    let ctx = setup().await;
    ctx.set_balance(ALICE, 10000).await;
    let plan = ctx.add_plan("Duo", 2000, 30, 0, 1).await;

    let first = ctx
        .api
        .create_order(&alice(), CreateOrderRequest::new(plan).with_quantity(2).with_idempotency_key("order-123"))
        .await
        .unwrap();
    assert_eq!(first.order.order.total_cents, Cents::from(4000));
    assert_eq!(first.balance.balance_cents, Cents::from(6000));
    assert_eq!(first.order.items[0].quantity, 2);
    assert_eq!(first.order.items[0].item_type, ItemType::Plan);

    let second = ctx
        .api
        .create_order(&alice(), CreateOrderRequest::new(plan).with_quantity(5).with_idempotency_key("order-123"))
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.order.order.id, first.order.order.id);
    assert_eq!(second.order.order.number, first.order.order.number);
    assert_eq!(second.balance.balance_cents, Cents::from(6000));
    assert!(second.balance_transaction.is_none());
    assert_eq!(ctx.count("SELECT COUNT(*) FROM orders").await, 1);
    assert_eq!(ctx.count("SELECT COUNT(*) FROM balance_transactions WHERE tx_type = 'purchase'").await, 1);
    assert_eq!(ctx.balance(ALICE).await, Cents::from(6000));

    // keys are scoped per user
    ctx.set_balance(BOB, 10000).await;
    let bobs = ctx
        .api
        .create_order(&bob(), CreateOrderRequest::new(plan).with_idempotency_key("order-123"))
        .await
        .unwrap();
    assert!(!bobs.replayed);
    assert_ne!(bobs.order.order.id, first.order.order.id);
}

#[tokio::test]
async fn racing_idempotent_creates_leave_one_order() {
    let ctx = setup().await;
    let request = || CreateOrderRequest::new(BASIC_PLAN).with_idempotency_key("race-1");
    let caller = alice();
    let (a, b) = tokio::join!(ctx.api.create_order(&caller, request()), ctx.api.create_order(&caller, request()));
    let (a, b) = (a.expect("first create"), b.expect("second create"));
    assert_eq!(a.order.order.id, b.order.order.id);
    assert!(a.replayed ^ b.replayed);
    assert_eq!(ctx.count("SELECT COUNT(*) FROM orders").await, 1);
    assert_eq!(ctx.count("SELECT COUNT(*) FROM balance_transactions").await, 1);
    assert_eq!(ctx.balance(ALICE).await, Cents::from(10000 - 2600));
}

#[tokio::test]
async fn create_validates_the_request() {
    let ctx = setup().await;
    let caller = alice();
    let err = ctx.api.create_order(&caller, CreateOrderRequest::new(BASIC_PLAN).with_quantity(0)).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");
    let err = ctx.api.create_order(&caller, CreateOrderRequest::new(BASIC_PLAN).with_quantity(11)).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("cheque");
    let err = ctx.api.create_order(&caller, request).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");
    let err = ctx.api.create_order(&caller, CreateOrderRequest::new(404)).await.unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)), "{err}");
    let err = ctx.api.create_order(&caller, CreateOrderRequest::new(LEGACY_PLAN)).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");

    let mut request = CreateOrderRequest::new(BASIC_PLAN);
    request.billing_option_id = Some(HIDDEN_OPTION);
    let err = ctx.api.create_order(&caller, request).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");
    let mut request = CreateOrderRequest::new(BASIC_PLAN);
    request.billing_option_id = Some(DAILY_OPTION);
    let err = ctx.api.create_order(&caller, request).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");

    let err = ctx.api.create_order(&caller, CreateOrderRequest::new(BASIC_PLAN).with_method("external")).await;
    assert!(matches!(err, Err(BillingError::InvalidArgument(_))));
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("stripe");
    assert!(matches!(ctx.api.create_order(&caller, request).await, Err(BillingError::InvalidArgument(_))));
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("paypal");
    assert!(matches!(ctx.api.create_order(&caller, request).await, Err(BillingError::NotFound(_))));

    assert_eq!(ctx.count("SELECT COUNT(*) FROM orders").await, 0);
    assert!(ctx.transport.requests().is_empty());
}

#[tokio::test]
async fn insufficient_balance_rolls_back() {
    let ctx = setup().await;
    let err = ctx.api.create_order(&bob(), CreateOrderRequest::new(BASIC_PLAN)).await.unwrap_err();
    match err {
        BillingError::InsufficientBalance { required, available } => {
            assert_eq!(required, Cents::from(2600));
            assert_eq!(available, Cents::from(500));
        },
        other => panic!("Expected InsufficientBalance, got {other}"),
    }
    assert_eq!(ctx.count("SELECT COUNT(*) FROM orders").await, 0);
    assert_eq!(ctx.count("SELECT COUNT(*) FROM order_items").await, 0);
    assert_eq!(ctx.balance(BOB).await, Cents::from(500));
}

#[tokio::test]
async fn billing_option_overrides_plan_terms() {
    let ctx = setup().await;
    ctx.set_balance(ALICE, 30000).await;
    let mut request = CreateOrderRequest::new(BASIC_PLAN);
    request.billing_option_id = Some(YEARLY_OPTION);
    let result = ctx.api.create_order(&alice(), request).await.unwrap();
    let order = &result.order.order;
    assert_eq!(order.total_cents, Cents::from(26000));
    assert_eq!(order.plan_snapshot.billing_option_id, Some(YEARLY_OPTION));
    assert_eq!(order.plan_snapshot.billing_option_name.as_deref(), Some("Yearly"));
    assert_eq!(order.plan_snapshot.duration_value, 1);
    let subs = ctx.db().fetch_subscriptions_for_user(ALICE).await.unwrap();
    let paid_at = order.paid_at.unwrap();
    let expected = paid_at.checked_add_months(chrono::Months::new(12));
    assert_eq!(subs[0].expires_at, expected);
}

#[tokio::test]
async fn currency_falls_back_to_the_balance_currency() {
    let ctx = setup().await;
    let result = ctx.api.create_order(&alice(), CreateOrderRequest::new(HOURLY_PLAN).with_quantity(3)).await.unwrap();
    let order = &result.order.order;
    assert_eq!(order.currency, "CNY");
    assert_eq!(order.total_cents, Cents::from(300));
    let subs = ctx.db().fetch_subscriptions_for_user(ALICE).await.unwrap();
    let paid_at = order.paid_at.unwrap();
    assert_eq!(subs[0].expires_at, Some(paid_at + chrono::Duration::hours(36)));
    assert_eq!(subs[0].traffic_total_bytes, 3 * 1_073_741_824);
}

#[tokio::test]
async fn free_orders_are_paid_without_a_ledger_entry() {
    let ctx = setup().await;
    let request = CreateOrderRequest::new(TRIAL_PLAN).with_method("external").with_channel("alipay");
    let result = ctx.api.create_order(&alice(), request).await.unwrap();
    let order = &result.order.order;
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.total_cents.is_zero());
    assert!(result.balance_transaction.is_none());
    assert!(result.order.payments.is_empty());
    assert!(ctx.transport.requests().is_empty());
    assert_eq!(ctx.db().fetch_subscriptions_for_user(ALICE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn coupons_discount_and_reserve() {
    let ctx = setup().await;
    let request = CreateOrderRequest::new(BASIC_PLAN).with_coupon("save10");
    let result = ctx.api.create_order(&alice(), request).await.unwrap();
    let order = &result.order.order;
    assert_eq!(order.total_cents, Cents::from(2340));
    assert_eq!(order.metadata["coupon_code"], json!("SAVE10"));
    assert_eq!(order.metadata["discount_cents"], json!(260));
    let discount = result.order.items.iter().find(|i| i.item_type == ItemType::Discount).expect("a discount line");
    assert_eq!(discount.subtotal_cents, Cents::from(-260));
    let redemptions = ctx.db().fetch_redemptions_for_order(order.id).await.unwrap();
    assert_eq!(redemptions.len(), 1);
    assert_eq!(redemptions[0].status, RedemptionStatus::Applied);

    ctx.expect_initiate();
    let request =
        CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("alipay").with_coupon("ONCE");
    let pending = ctx.api.create_order(&alice(), request).await.unwrap();
    assert_eq!(pending.order.order.total_cents, Cents::from(2300));
    let redemptions = ctx.db().fetch_redemptions_for_order(pending.order.order.id).await.unwrap();
    assert_eq!(redemptions[0].status, RedemptionStatus::Reserved);

    // a reserved redemption counts against the limit
    let err = ctx.api.create_order(&bob(), CreateOrderRequest::new(TRIAL_PLAN).with_coupon("ONCE")).await.unwrap_err();
    assert!(matches!(err, BillingError::InvalidArgument(_)), "{err}");
    for code in ["EXPIRED", "BIGSPEND", "NOPE"] {
        let err = ctx.api.create_order(&alice(), CreateOrderRequest::new(BASIC_PLAN).with_coupon(code)).await;
        assert!(matches!(err, Err(BillingError::InvalidArgument(_))), "{code}");
    }
}

#[tokio::test]
async fn orders_are_private_to_their_owner() {
    let ctx = setup().await;
    let result = ctx.api.create_order(&alice(), CreateOrderRequest::new(BASIC_PLAN)).await.unwrap();
    let id = result.order.order.id;
    let err = ctx.api.payment_status(&bob(), id).await.unwrap_err();
    assert!(matches!(err, BillingError::Forbidden(_)));
    let err = ctx.api.order_detail(&bob(), id).await.unwrap_err();
    assert!(matches!(err, BillingError::Forbidden(_)));
    let view = ctx.api.payment_status(&admin(), id).await.unwrap();
    assert_eq!(view.status, OrderStatus::Paid);
    let view = ctx.api.payment_status(&alice(), id).await.unwrap();
    assert_eq!(view.payment_status, PaymentStatus::Succeeded);
    assert!(matches!(ctx.api.payment_status(&alice(), id + 100).await, Err(BillingError::NotFound(_))));
}
