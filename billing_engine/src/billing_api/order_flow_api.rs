use std::fmt::Debug;

use billing_common::{normalize_currency, Cents, DEFAULT_CURRENCY};
use chrono::{DateTime, Utc};
use log::*;
use serde_json::json;

use crate::{
    billing_api::{
        errors::BillingError,
        identity::Caller,
        order_objects::{CreateOrderRequest, CreateOrderResult, OrderDetail, PaymentStatusView, MAX_QUANTITY},
    },
    coupons::{quote_coupon, record_redemption, CouponQuote},
    db::traits::{BillingDatabase, BillingTransaction},
    db_types::{
        BalanceTransaction,
        BalanceTxType,
        DurationUnit,
        InsertOrderResult,
        ItemType,
        Metadata,
        NewAuditEntry,
        NewBalanceTransaction,
        NewOrder,
        NewOrderItem,
        NewOrderPayment,
        Order,
        OrderPayment,
        OrderStatus,
        PaymentChannel,
        PaymentMethod,
        PaymentRecordUpdate,
        PaymentStateUpdate,
        Plan,
        PlanBillingOption,
        PlanSnapshot,
        Subscription,
        UserBalance,
    },
    events::{EventProducers, OrderPaidEvent},
    gateway::{GatewayContext, GatewayEngine, HttpTransport},
    helpers::new_order_number,
    provisioning::ensure_order_subscription,
};

/// How many freshly generated order numbers are tried before giving up on a collision streak.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// `OrderFlowApi` is the entry point for every order and payment flow: creating orders, settling them through the
/// user's balance, an admin or a payment gateway, cancelling and refunding them.
///
/// Every state change happens inside a single [`BillingTransaction`] that also writes the audit entry. Events are
/// published only after that transaction commits.
pub struct OrderFlowApi<B, T> {
    pub(super) db: B,
    pub(super) gateway: GatewayEngine<T>,
    pub(super) producers: EventProducers,
}

impl<B, T> Debug for OrderFlowApi<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, T> OrderFlowApi<B, T> {
    pub fn new(db: B, gateway: GatewayEngine<T>, producers: EventProducers) -> Self {
        Self { db, gateway, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

/// Price and duration of a purchase once the billing option (if any) has been applied.
struct PriceTerms {
    unit_price: Cents,
    currency: String,
    duration_unit: DurationUnit,
    duration_value: i64,
    option: Option<PlanBillingOption>,
}

/// A validated create request, ready to be written.
struct OrderDraft {
    user_id: i64,
    plan: Plan,
    terms: PriceTerms,
    quantity: i64,
    subtotal: Cents,
    method: PaymentMethod,
    channel: Option<PaymentChannel>,
    return_url: Option<String>,
    coupon_code: Option<String>,
    idempotency_key: Option<String>,
}

struct CreatedOrder {
    order: Order,
    balance: UserBalance,
    balance_transaction: Option<BalanceTransaction>,
    payment: Option<OrderPayment>,
    subscription: Option<Subscription>,
}

enum CreateOutcome {
    Created(Box<CreatedOrder>),
    DuplicateKey,
}

impl<B, T> OrderFlowApi<B, T>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    /// Creates an order and settles it right away when it is free or paid from the balance.
    ///
    /// A repeated request with an idempotency key the user has already used returns the earlier order untouched. Two
    /// such requests racing each other are settled by the store's uniqueness constraint: the loser rolls back and
    /// returns the winner's order.
    ///
    /// For external payments the gateway is called after the order has been committed. If that call fails the order
    /// and its pending payment remain, and the failure is reported in [`CreateOrderResult::payment_error`].
    pub async fn create_order(
        &self,
        caller: &Caller,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResult, BillingError> {
        let idempotency_key = non_empty(request.idempotency_key.as_deref());
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(order) = self.db.fetch_order_by_idempotency_key(caller.user_id, key).await? {
                debug!("🔄️ Order {} returned again for idempotency key {key}", order.number);
                return self.replay_create(order).await;
            }
        }
        let draft = self.validate_create(caller, request, idempotency_key).await?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let created = match create_in_tx(&mut tx, &draft, now).await? {
            CreateOutcome::Created(created) => {
                tx.commit().await?;
                created
            },
            CreateOutcome::DuplicateKey => {
                drop(tx);
                let key = draft.idempotency_key.as_deref().unwrap_or_default();
                debug!("🔄️ Lost an idempotency race for key {key}. Returning the committed order.");
                let order = self
                    .db
                    .fetch_order_by_idempotency_key(draft.user_id, key)
                    .await?
                    .ok_or_else(|| BillingError::Conflict(format!("Idempotency key {key} is already in use")))?;
                return self.replay_create(order).await;
            },
        };
        info!(
            "🔄️ Order {} created for user {}: {} {} by {}, status {}",
            created.order.number,
            draft.user_id,
            created.order.total_cents,
            created.order.currency,
            created.order.payment_method,
            created.order.status
        );
        let mut payment_error = None;
        if let (Some(channel), Some(payment)) = (&draft.channel, &created.payment) {
            if let Err(e) = self.initiate_payment(channel, &created.order, payment, &draft).await {
                warn!("🔄️ Could not start payment {} for order {}: {e}", payment.id, created.order.number);
                payment_error = Some(e.to_string());
            }
        }
        if created.order.status == OrderStatus::Paid {
            let event = OrderPaidEvent::new(created.order.clone(), created.subscription.clone());
            self.producers.order_paid(event).await;
        }
        let order = self.detail_of(created.order).await?;
        Ok(CreateOrderResult {
            order,
            balance: created.balance,
            balance_transaction: created.balance_transaction,
            replayed: false,
            payment_error,
        })
    }

    /// The read-only settlement projection of an order. Users may only look at their own orders.
    pub async fn payment_status(&self, caller: &Caller, order_id: i64) -> Result<PaymentStatusView, BillingError> {
        let order = self.visible_order(caller, order_id).await?;
        Ok(PaymentStatusView::from(order))
    }

    /// An order with its items, payments and refunds. Users may only look at their own orders.
    pub async fn order_detail(&self, caller: &Caller, order_id: i64) -> Result<OrderDetail, BillingError> {
        let order = self.visible_order(caller, order_id).await?;
        self.detail_of(order).await
    }

    pub(super) async fn detail_of(&self, order: Order) -> Result<OrderDetail, BillingError> {
        let ids = [order.id];
        let items = self.db.fetch_order_items(order.id).await?;
        let payments = self.db.fetch_payments_for_orders(&ids).await?;
        let refunds = self.db.fetch_refunds_for_orders(&ids).await?;
        Ok(OrderDetail { order, items, payments, refunds })
    }

    async fn visible_order(&self, caller: &Caller, order_id: i64) -> Result<Order, BillingError> {
        let order = self.db.fetch_order(order_id).await?.ok_or_else(|| order_not_found(order_id))?;
        check_owner(caller, &order)?;
        Ok(order)
    }

    async fn replay_create(&self, order: Order) -> Result<CreateOrderResult, BillingError> {
        let balance = self.db.fetch_balance(order.user_id).await?.unwrap_or_else(|| UserBalance {
            user_id: order.user_id,
            balance_cents: Cents::zero(),
            currency: order.currency.clone(),
            updated_at: order.created_at,
        });
        let order = self.detail_of(order).await?;
        Ok(CreateOrderResult { order, balance, balance_transaction: None, replayed: true, payment_error: None })
    }

    async fn validate_create(
        &self,
        caller: &Caller,
        request: CreateOrderRequest,
        idempotency_key: Option<String>,
    ) -> Result<OrderDraft, BillingError> {
        let quantity = request.quantity.unwrap_or(1);
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(BillingError::InvalidArgument(format!("Quantity must be between 1 and {MAX_QUANTITY}")));
        }
        let method = PaymentMethod::from_request(request.payment_method.as_deref())?;
        let plan = self
            .db
            .fetch_plan(request.plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Plan {}", request.plan_id)))?;
        if !plan.is_purchasable() {
            return Err(BillingError::InvalidArgument(format!("Plan {} is not available for purchase", plan.id)));
        }
        let terms = self.price_terms(caller.user_id, &plan, request.billing_option_id).await?;
        let subtotal = terms
            .unit_price
            .checked_mul(quantity)
            .ok_or_else(|| BillingError::InvalidArgument("The order total is too large".into()))?;
        let channel = match method {
            PaymentMethod::External if subtotal.is_positive() => {
                Some(self.enabled_channel(request.payment_channel.as_deref()).await?)
            },
            _ => None,
        };
        Ok(OrderDraft {
            user_id: caller.user_id,
            plan,
            terms,
            quantity,
            subtotal,
            method,
            channel,
            return_url: non_empty(request.payment_return_url.as_deref()),
            coupon_code: non_empty(request.coupon_code.as_deref()),
            idempotency_key,
        })
    }

    /// Billing option fields take precedence over the plan's. The currency falls back to the user's balance currency
    /// and finally to [`DEFAULT_CURRENCY`].
    async fn price_terms(&self, user_id: i64, plan: &Plan, option_id: Option<i64>) -> Result<PriceTerms, BillingError> {
        let option = match option_id {
            None => None,
            Some(id) => {
                let option = self
                    .db
                    .fetch_billing_option(id)
                    .await?
                    .ok_or_else(|| BillingError::NotFound(format!("Billing option {id}")))?;
                if option.plan_id != plan.id {
                    return Err(BillingError::InvalidArgument(format!(
                        "Billing option {id} does not belong to plan {}",
                        plan.id
                    )));
                }
                if !option.is_purchasable() {
                    return Err(BillingError::InvalidArgument(format!("Billing option {id} is not available")));
                }
                Some(option)
            },
        };
        let (unit_price, duration_unit, duration_value) = match &option {
            Some(o) => (o.price_cents, o.duration_unit, o.duration_value),
            None => (plan.price_cents, plan.duration_unit, plan.duration_value),
        };
        if unit_price < Cents::zero() {
            return Err(BillingError::InvalidArgument(format!("Plan {} has a negative price", plan.id)));
        }
        let currency = match option.as_ref().and_then(|o| o.currency.clone()).or_else(|| plan.currency.clone()) {
            Some(c) => c,
            None => self
                .db
                .fetch_balance(user_id)
                .await?
                .map(|b| b.currency)
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        };
        let currency = normalize_currency(&currency)?;
        Ok(PriceTerms { unit_price, currency, duration_unit, duration_value, option })
    }

    async fn enabled_channel(&self, code: Option<&str>) -> Result<PaymentChannel, BillingError> {
        let code = non_empty(code).ok_or_else(|| {
            BillingError::InvalidArgument("A payment channel is required for external payments".into())
        })?;
        let channel = self
            .db
            .fetch_channel(&code)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment channel {code}")))?;
        if !channel.enabled {
            return Err(BillingError::InvalidArgument(format!("Payment channel {code} is disabled")));
        }
        Ok(channel)
    }

    /// Calls the gateway for a freshly committed payment and stores what it answered on the payment row. A failure
    /// is recorded on the payment as well, so the attempt can be diagnosed and reconciled later.
    async fn initiate_payment(
        &self,
        channel: &PaymentChannel,
        order: &Order,
        payment: &OrderPayment,
        draft: &OrderDraft,
    ) -> Result<(), BillingError> {
        let ctx = GatewayContext {
            order,
            payment,
            plan_id: Some(draft.plan.id),
            plan_name: &draft.plan.name,
            quantity: draft.quantity,
            return_url: draft.return_url.as_deref(),
        };
        let (update, result) = match self.gateway.initiate(channel, &ctx).await {
            Ok(outcome) => {
                let update = PaymentRecordUpdate::metadata_only(outcome.metadata).with_reference(outcome.reference);
                (update, Ok(()))
            },
            Err(e) => {
                let mut metadata = Metadata::new();
                metadata.insert("initiate_error".into(), json!(e.to_string()));
                metadata.insert("initiate_failed_at".into(), json!(Utc::now().to_rfc3339()));
                (PaymentRecordUpdate::metadata_only(metadata), Err(BillingError::from(e)))
            },
        };
        let mut tx = self.db.begin().await?;
        tx.update_payment_record(payment.id, update).await?;
        tx.commit().await?;
        result
    }
}

async fn create_in_tx<X: BillingTransaction>(
    tx: &mut X,
    draft: &OrderDraft,
    now: DateTime<Utc>,
) -> Result<CreateOutcome, BillingError> {
    let currency = draft.terms.currency.as_str();
    let mut balance = tx.fetch_or_create_balance(draft.user_id, currency).await?;
    let quote = match draft.coupon_code.as_deref() {
        Some(code) => Some(quote_coupon(tx, code, draft.user_id, draft.subtotal, currency, now).await?),
        None => None,
    };
    let discount = quote.as_ref().map(|q| q.discount).unwrap_or_default();
    let total = draft.subtotal.saturating_sub_floor(discount);
    if draft.method == PaymentMethod::Balance && total.is_positive() {
        require_balance_currency(&balance, currency)?;
    }

    let mut metadata = Metadata::new();
    metadata.insert("quantity".into(), json!(draft.quantity));
    if let Some(channel) = &draft.channel {
        metadata.insert("payment_channel".into(), json!(channel.code));
    }
    if let Some(url) = &draft.return_url {
        metadata.insert("payment_return_url".into(), json!(url));
    }
    if let Some(q) = &quote {
        metadata.insert("coupon_code".into(), json!(q.coupon.code));
        metadata.insert("coupon_id".into(), json!(q.coupon.id));
        metadata.insert("discount_cents".into(), json!(q.discount));
    }
    let template = NewOrder {
        number: String::new(),
        user_id: draft.user_id,
        plan_id: Some(draft.plan.id),
        idempotency_key: draft.idempotency_key.clone(),
        payment_method: draft.method,
        total_cents: total,
        currency: currency.to_string(),
        plan_snapshot: plan_snapshot(&draft.plan, &draft.terms),
        metadata,
    };
    let mut inserted = None;
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        let candidate = NewOrder { number: new_order_number(now), ..template.clone() };
        match tx.insert_order(candidate).await? {
            InsertOrderResult::Inserted(order) => {
                inserted = Some(order);
                break;
            },
            InsertOrderResult::DuplicateNumber => warn!("🔄️ Order number collision. Generating another one."),
            InsertOrderResult::DuplicateIdempotencyKey => return Ok(CreateOutcome::DuplicateKey),
        }
    }
    let order =
        inserted.ok_or_else(|| BillingError::Conflict("Could not allocate a unique order number".to_string()))?;
    tx.insert_order_items(order.id, &order_items(draft, quote.as_ref())).await?;

    let paid = total.is_zero() || draft.method == PaymentMethod::Balance;
    let mut balance_transaction = None;
    let mut payment = None;
    let order = if paid {
        if total.is_positive() {
            let (after, ledger) = tx
                .adjust_balance(draft.user_id, NewBalanceTransaction {
                    tx_type: BalanceTxType::Purchase,
                    amount_cents: -total,
                    reference: Some(order.number.clone()),
                    description: Some(format!("Purchase of {}", draft.plan.name)),
                    metadata: Metadata::from_iter([("order_id".to_string(), json!(order.id))]),
                })
                .await?;
            balance = after;
            balance_transaction = Some(ledger);
        }
        tx.update_payment_state(order.id, PaymentStateUpdate::succeeded(now)).await?
    } else {
        match (&draft.channel, draft.method) {
            (Some(channel), PaymentMethod::External) => {
                let intent = format!("{}-{}", channel.code, order.number);
                let order = tx.set_payment_intent(order.id, &intent).await?;
                let opened = tx
                    .insert_payment(NewOrderPayment {
                        order_id: order.id,
                        provider: channel.code.clone(),
                        method: channel.provider.clone(),
                        intent_id: Some(intent),
                        amount_cents: total,
                        currency: currency.to_string(),
                        metadata: Metadata::new(),
                    })
                    .await?;
                payment = Some(opened);
                order
            },
            _ => order,
        }
    };

    let subscription = if paid {
        Some(ensure_order_subscription(tx, order.id, now).await?.subscription)
    } else {
        None
    };
    if let Some(q) = &quote {
        record_redemption(tx, q, draft.user_id, order.id, currency, paid).await?;
    }
    tx.append_audit(NewAuditEntry::order(
        Some(draft.user_id),
        "order.create",
        order.id,
        json!({
            "number": order.number,
            "total_cents": total,
            "currency": currency,
            "payment_method": draft.method,
            "coupon_code": quote.as_ref().map(|q| q.coupon.code.clone()),
            "discount_cents": discount,
        }),
    ))
    .await?;
    let order = tx.fetch_order_for_update(order.id).await?.ok_or_else(|| order_not_found(order.id))?;
    Ok(CreateOutcome::Created(Box::new(CreatedOrder { order, balance, balance_transaction, payment, subscription })))
}

fn plan_snapshot(plan: &Plan, terms: &PriceTerms) -> PlanSnapshot {
    PlanSnapshot {
        id: plan.id,
        name: plan.name.clone(),
        slug: plan.slug.clone(),
        description: plan.description.clone(),
        unit_price_cents: terms.unit_price,
        currency: terms.currency.clone(),
        duration_unit: Some(terms.duration_unit),
        duration_value: terms.duration_value,
        duration_days: (terms.duration_unit == DurationUnit::Day).then_some(terms.duration_value),
        traffic_limit_bytes: plan.traffic_limit_bytes,
        traffic_multipliers: plan.traffic_multipliers.clone(),
        devices_limit: plan.devices_limit,
        features: plan.features.clone(),
        tags: plan.tags.clone(),
        binding_ids: plan.binding_ids.clone(),
        billing_option_id: terms.option.as_ref().map(|o| o.id),
        billing_option_name: terms.option.as_ref().map(|o| o.name.clone()),
    }
}

fn order_items(draft: &OrderDraft, quote: Option<&CouponQuote>) -> Vec<NewOrderItem> {
    let currency = draft.terms.currency.clone();
    let mut plan_meta = Metadata::new();
    plan_meta.insert("duration_unit".into(), json!(draft.terms.duration_unit));
    plan_meta.insert("duration_value".into(), json!(draft.terms.duration_value));
    plan_meta.insert("traffic_limit_bytes".into(), json!(draft.plan.traffic_limit_bytes));
    plan_meta.insert("devices_limit".into(), json!(draft.plan.devices_limit));
    if let Some(option) = &draft.terms.option {
        plan_meta.insert("billing_option_id".into(), json!(option.id));
    }
    let mut items = vec![NewOrderItem {
        item_type: ItemType::Plan,
        item_id: Some(draft.plan.id),
        name: draft.plan.name.clone(),
        quantity: draft.quantity,
        unit_price_cents: draft.terms.unit_price,
        subtotal_cents: draft.subtotal,
        currency: currency.clone(),
        metadata: plan_meta,
    }];
    if let Some(q) = quote {
        items.push(NewOrderItem {
            item_type: ItemType::Discount,
            item_id: Some(q.coupon.id),
            name: q.coupon.code.clone(),
            quantity: 1,
            unit_price_cents: -q.discount,
            subtotal_cents: -q.discount,
            currency,
            metadata: Metadata::from_iter([("coupon_code".to_string(), json!(q.coupon.code))]),
        });
    }
    items
}

/// The gateway view of an existing order and payment.
pub(super) fn gateway_context<'a>(order: &'a Order, payment: &'a OrderPayment) -> GatewayContext<'a> {
    GatewayContext {
        order,
        payment,
        plan_id: order.plan_id,
        plan_name: &order.plan_snapshot.name,
        quantity: order.metadata_i64("quantity").unwrap_or(1),
        return_url: order.metadata_str("payment_return_url"),
    }
}

pub(super) fn check_owner(caller: &Caller, order: &Order) -> Result<(), BillingError> {
    if caller.is_admin() || order.user_id == caller.user_id {
        Ok(())
    } else {
        Err(BillingError::Forbidden(format!("Order {} belongs to another user", order.id)))
    }
}

pub(super) fn require_admin(caller: &Caller) -> Result<(), BillingError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(BillingError::Forbidden("This operation requires the admin role".into()))
    }
}

/// Balance movements never convert between currencies.
pub(super) fn require_balance_currency(balance: &UserBalance, currency: &str) -> Result<(), BillingError> {
    if balance.currency.eq_ignore_ascii_case(currency) {
        Ok(())
    } else {
        Err(BillingError::InvalidArgument(format!(
            "The order is in {currency} but the balance of user {} is in {}",
            balance.user_id, balance.currency
        )))
    }
}

pub(super) fn order_not_found(order_id: i64) -> BillingError {
    BillingError::NotFound(format!("Order {order_id}"))
}

/// Trimmed copy of `value`, or `None` if nothing is left.
pub(super) fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}
