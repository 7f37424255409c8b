use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use billing_common::Cents;
use billing_engine::{
    db_types::OrderStatus,
    events::{EventHandlers, EventHooks},
    order_objects::{CancelOrderRequest, CreateOrderRequest, PaymentCallback, RefundRequest},
};
use log::*;
use support::*;

mod support;

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(Ordering::Relaxed)
    }

    /// Handlers run on their own tasks, so give them a moment to catch up.
    pub async fn wait_for(&self, expected: i32) -> i32 {
        for _ in 0..50 {
            if self.count() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.count()
    }
}

fn counting<E>(hook: &HookCalled) -> impl Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static
where E: 'static {
    let hook = hook.clone();
    move |_| {
        let hook = hook.clone();
        Box::pin(async move {
            hook.called();
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    }
}

#[tokio::test]
async fn hooks_fire_after_commit() {
    let paid = HookCalled::default();
    let annulled = HookCalled::default();
    let refunded = HookCalled::default();
    let mut hooks = EventHooks::default();
    hooks.on_order_paid(counting(&paid)).on_order_annulled(counting(&annulled)).on_order_refunded(counting(&refunded));
    let handlers = EventHandlers::new(10, hooks);
    let ctx = setup_with(handlers.producers()).await;
    handlers.start_handlers();

    // a balance purchase is paid straight away
    let bought = ctx.api.create_order(&alice(), CreateOrderRequest::new(BASIC_PLAN)).await.unwrap();
    assert_eq!(bought.order.order.status, OrderStatus::Paid);
    assert_eq!(paid.wait_for(1).await, 1);

    // a failed creation publishes nothing
    let err = ctx.api.create_order(&bob(), CreateOrderRequest::new(BASIC_PLAN)).await;
    assert!(err.is_err());

    ctx.expect_initiate();
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("alipay");
    let pending = ctx.api.create_order(&alice(), request).await.unwrap();
    ctx.api.cancel_order(&alice(), pending.order.order.id, CancelOrderRequest::default()).await.unwrap();
    assert_eq!(annulled.wait_for(1).await, 1);

    ctx.expect_initiate();
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("alipay");
    let external = ctx.api.create_order(&alice(), request).await.unwrap();
    let callback = PaymentCallback::succeeded(external.order.order.id, external.order.payments[0].id);
    ctx.api.payment_callback(callback.clone()).await.unwrap();
    // a replayed callback does not publish again
    ctx.api.payment_callback(callback).await.unwrap();
    assert_eq!(paid.wait_for(2).await, 2);

    let refund = RefundRequest { amount_cents: Cents::from(1000), reason: None };
    ctx.api.refund(&admin(), bought.order.order.id, refund).await.unwrap();
    assert_eq!(refunded.wait_for(1).await, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(paid.count(), 2);
    assert_eq!(annulled.count(), 1);
    assert_eq!(refunded.count(), 1);
    info!("🚀️ hooks test complete");
}

#[tokio::test]
async fn failed_payments_publish_an_annulment() {
    let annulled = HookCalled::default();
    let mut hooks = EventHooks::default();
    hooks.on_order_annulled(counting(&annulled));
    let handlers = EventHandlers::new(10, hooks);
    let ctx = setup_with(handlers.producers()).await;
    handlers.start_handlers();

    ctx.expect_initiate();
    let request = CreateOrderRequest::new(BASIC_PLAN).with_method("external").with_channel("alipay");
    let created = ctx.api.create_order(&alice(), request).await.unwrap();
    let callback =
        PaymentCallback::failed(created.order.order.id, created.order.payments[0].id, Some("declined"), None);
    ctx.api.payment_callback(callback.clone()).await.unwrap();
    ctx.api.payment_callback(callback).await.unwrap();
    assert_eq!(annulled.wait_for(1).await, 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(annulled.count(), 1);
}
