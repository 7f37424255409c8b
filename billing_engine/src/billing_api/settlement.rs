//! Flows that move an existing order through its settlement states.
//!
//! Every flow locks the order with [`BillingTransaction::fetch_order_for_update`] first, so flows acting on the same
//! order run one after the other. The second of two identical gateway reports therefore always sees the first one's
//! result and takes the replay path.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::*;
use serde_json::json;

use super::order_flow_api::{
    check_owner,
    gateway_context,
    non_empty,
    order_not_found,
    require_admin,
    require_balance_currency,
};
use crate::{
    billing_api::{
        errors::BillingError,
        identity::Caller,
        order_flow_api::OrderFlowApi,
        order_objects::{
            CancelOrderRequest,
            MarkPaidRequest,
            MarkPaidResult,
            PaymentCallback,
            RefundRequest,
            RefundResult,
            SettlementResult,
            WebhookEnvelope,
        },
    },
    coupons::{apply_redemptions, release_redemptions},
    db::traits::{BillingDatabase, BillingTransaction},
    db_types::{
        BalanceTxType,
        Metadata,
        NewAuditEntry,
        NewBalanceTransaction,
        NewOrderRefund,
        Order,
        OrderPayment,
        OrderStatus,
        PaymentMethod,
        PaymentRecordUpdate,
        PaymentStateUpdate,
        PaymentStatus,
        Subscription,
    },
    events::{OrderAnnulledEvent, OrderPaidEvent, OrderRefundedEvent},
    gateway::{canonical_status, HttpTransport},
    provisioning::{ensure_order_subscription, SubscriptionAction},
    state_machine::{status_after_refund, status_allows_transition, user_may_cancel},
};

/// A payment status reported by a gateway, either pushed (callback) or pulled (reconcile).
struct PaymentReport {
    status: PaymentStatus,
    reference: Option<String>,
    failure_code: Option<String>,
    failure_message: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    metadata: Metadata,
    actor_id: Option<i64>,
    source: &'static str,
}

struct AppliedReport {
    order: Order,
    payment: OrderPayment,
    subscription: Option<Subscription>,
    /// The status the payment moved to, if it moved.
    transition: Option<PaymentStatus>,
}

impl From<AppliedReport> for SettlementResult {
    fn from(applied: AppliedReport) -> Self {
        Self {
            order: applied.order,
            payment: applied.payment,
            subscription: applied.subscription,
            changed: applied.transition.is_some(),
        }
    }
}

impl<B, T> OrderFlowApi<B, T>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    /// Cancels an order. Users may cancel their own orders while payment is outstanding. Admins may cancel any order
    /// that is not paid and not already closed. Reserved coupon redemptions are released.
    pub async fn cancel_order(
        &self,
        caller: &Caller,
        order_id: i64,
        request: CancelOrderRequest,
    ) -> Result<Order, BillingError> {
        let now = Utc::now();
        let reason = non_empty(request.reason.as_deref());
        let mut tx = self.db.begin().await?;
        let order = tx.fetch_order_for_update(order_id).await?.ok_or_else(|| order_not_found(order_id))?;
        check_owner(caller, &order)?;
        let allowed = if caller.is_admin() {
            status_allows_transition(order.status, OrderStatus::Cancelled)
        } else {
            user_may_cancel(order.status)
        };
        if !allowed {
            let msg = match order.status {
                OrderStatus::Paid | OrderStatus::PartiallyRefunded => {
                    format!("Order {} is paid and must be refunded instead", order.id)
                },
                status => format!("Order {} is {status} and cannot be cancelled", order.id),
            };
            return Err(BillingError::InvalidState(msg));
        }
        tx.update_order_status(order.id, OrderStatus::Cancelled, now).await?;
        let mut patch = Metadata::new();
        patch.insert("cancelled_by".into(), json!(caller.user_id));
        patch.insert("cancelled_by_role".into(), json!(if caller.is_admin() { "admin" } else { "user" }));
        if let Some(r) = &reason {
            patch.insert("cancel_reason".into(), json!(r));
        }
        let order = tx.merge_order_metadata(order.id, patch).await?;
        let released = release_redemptions(&mut tx, order.id).await?;
        tx.append_audit(NewAuditEntry::order(
            Some(caller.user_id),
            "order.cancel",
            order.id,
            json!({ "reason": reason, "released_redemptions": released }),
        ))
        .await?;
        tx.commit().await?;
        info!("🔄️ Order {} cancelled by user {}", order.number, caller.user_id);
        self.producers.order_annulled(OrderAnnulledEvent::new(order.clone(), reason)).await;
        Ok(order)
    }

    /// Admin settlement of an order paid out of band, optionally charging the user's balance.
    pub async fn mark_paid(
        &self,
        caller: &Caller,
        order_id: i64,
        request: MarkPaidRequest,
    ) -> Result<MarkPaidResult, BillingError> {
        require_admin(caller)?;
        let method = match non_empty(request.payment_method.as_deref()) {
            None if request.charge_balance => PaymentMethod::Balance,
            None => PaymentMethod::Manual,
            Some(m) => PaymentMethod::from_request(Some(m.as_str()))?,
        };
        match method {
            PaymentMethod::External => {
                return Err(BillingError::InvalidArgument("Orders can only be marked paid as manual or balance".into()));
            },
            // balance orders are refunded to the balance
            PaymentMethod::Balance if !request.charge_balance => {
                return Err(BillingError::InvalidArgument(
                    "Marking an order paid by balance requires charging the balance".into(),
                ));
            },
            PaymentMethod::Manual if request.charge_balance => {
                return Err(BillingError::InvalidArgument(
                    "Charging the balance settles the order by balance, not manually".into(),
                ));
            },
            _ => {},
        }
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let order = tx.fetch_order_for_update(order_id).await?.ok_or_else(|| order_not_found(order_id))?;
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::PendingPayment) {
            return Err(BillingError::InvalidState(format!(
                "Order {} is {} and cannot be marked paid",
                order.id, order.status
            )));
        }
        let balance_transaction = if request.charge_balance && order.total_cents.is_positive() {
            let balance = tx.fetch_or_create_balance(order.user_id, &order.currency).await?;
            require_balance_currency(&balance, &order.currency)?;
            let (_, ledger) = tx
                .adjust_balance(order.user_id, NewBalanceTransaction {
                    tx_type: BalanceTxType::Purchase,
                    amount_cents: -order.total_cents,
                    reference: Some(order.number.clone()),
                    description: Some(format!("Settlement of order {}", order.number)),
                    metadata: Metadata::from_iter([
                        ("order_id".to_string(), json!(order.id)),
                        ("marked_paid_by".to_string(), json!(caller.user_id)),
                    ]),
                })
                .await?;
            Some(ledger)
        } else {
            None
        };
        let reference = non_empty(request.reference.as_deref());
        let update = PaymentStateUpdate::succeeded(now).with_reference(reference.clone()).with_method(method);
        tx.update_payment_state(order.id, update).await?;
        let mut patch = Metadata::new();
        patch.insert("marked_paid_by".into(), json!(caller.user_id));
        patch.insert("charge_balance".into(), json!(request.charge_balance));
        if let Some(note) = non_empty(request.note.as_deref()) {
            patch.insert("mark_paid_note".into(), json!(note));
        }
        tx.merge_order_metadata(order.id, patch).await?;
        let provisioned = ensure_order_subscription(&mut tx, order.id, now).await?;
        apply_redemptions(&mut tx, order.id).await?;
        tx.append_audit(NewAuditEntry::order(
            Some(caller.user_id),
            "order.mark_paid",
            order.id,
            json!({
                "payment_method": method,
                "reference": reference,
                "charge_balance": request.charge_balance,
                "balance_transaction_id": balance_transaction.as_ref().map(|t| t.id),
                "subscription_id": provisioned.subscription.id,
            }),
        ))
        .await?;
        let order = tx.fetch_order_for_update(order.id).await?.ok_or_else(|| order_not_found(order_id))?;
        tx.commit().await?;
        info!("🔄️ Order {} marked paid by admin {}", order.number, caller.user_id);
        let event = OrderPaidEvent::new(order.clone(), Some(provisioned.subscription.clone()));
        self.producers.order_paid(event).await;
        Ok(MarkPaidResult { order, subscription: provisioned.subscription, balance_transaction })
    }

    /// Refunds part or all of what is left on a paid order.
    ///
    /// Balance orders are credited back to the balance. External orders are refunded through the gateway of their
    /// latest succeeded payment; that call happens inside the transaction so that the gateway reference lands in the
    /// same write as the refund row. Manual orders were settled out of band and cannot be refunded here.
    pub async fn refund(
        &self,
        caller: &Caller,
        order_id: i64,
        request: RefundRequest,
    ) -> Result<RefundResult, BillingError> {
        require_admin(caller)?;
        let amount = billing_common::validate_positive_amount(request.amount_cents)?;
        let reason = non_empty(request.reason.as_deref());
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let order = tx.fetch_order_for_update(order_id).await?.ok_or_else(|| order_not_found(order_id))?;
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::PartiallyRefunded) {
            let msg = format!("Order {} is {} and cannot be refunded", order.id, order.status);
            return Err(BillingError::InvalidState(msg));
        }
        if amount > order.remaining_refundable() {
            return Err(BillingError::InvalidArgument(format!(
                "Refund of {amount} exceeds the {} left to refund on order {}",
                order.remaining_refundable(),
                order.id
            )));
        }
        let mut refund_meta = Metadata::new();
        refund_meta.insert("refunded_by".into(), json!(caller.user_id));
        let mut reference = None;
        let mut balance_transaction = None;
        match order.payment_method {
            PaymentMethod::Balance => {
                let balance = tx.fetch_or_create_balance(order.user_id, &order.currency).await?;
                require_balance_currency(&balance, &order.currency)?;
                let (_, ledger) = tx
                    .adjust_balance(order.user_id, NewBalanceTransaction {
                        tx_type: BalanceTxType::Refund,
                        amount_cents: amount,
                        reference: Some(order.number.clone()),
                        description: reason.clone().or_else(|| Some(format!("Refund for order {}", order.number))),
                        metadata: Metadata::from_iter([("order_id".to_string(), json!(order.id))]),
                    })
                    .await?;
                refund_meta.insert("balance_transaction_id".into(), json!(ledger.id));
                balance_transaction = Some(ledger);
            },
            PaymentMethod::External => {
                let payment = tx
                    .fetch_payments_for_order(order.id)
                    .await?
                    .into_iter()
                    .filter(|p| p.status == PaymentStatus::Succeeded)
                    .max_by_key(|p| p.id)
                    .ok_or_else(|| {
                        BillingError::InvalidState(format!("Order {} has no succeeded payment to refund", order.id))
                    })?;
                let channel = self
                    .db
                    .fetch_channel(&payment.provider)
                    .await?
                    .ok_or_else(|| BillingError::NotFound(format!("Payment channel {}", payment.provider)))?;
                let ctx = gateway_context(&order, &payment);
                let outcome = self.gateway.refund(&channel, &ctx, amount, reason.as_deref().unwrap_or_default()).await?;
                reference = outcome.reference.clone();
                refund_meta.insert("payment_id".into(), json!(payment.id));
                refund_meta.insert("payment_channel".into(), json!(channel.code));
                refund_meta.insert("gateway_status".into(), json!(outcome.raw_status));
                if let Some(r) = &outcome.reference {
                    refund_meta.insert("gateway_reference".into(), json!(r));
                }
                let mut payment_patch =
                    outcome.metadata.into_iter().map(|(k, v)| (format!("refund_{k}"), v)).collect::<Metadata>();
                payment_patch.insert("refunded_at".into(), json!(now.to_rfc3339()));
                tx.update_payment_record(payment.id, PaymentRecordUpdate::metadata_only(payment_patch)).await?;
            },
            PaymentMethod::Manual => {
                return Err(BillingError::InvalidArgument(format!(
                    "Order {} was settled manually and must be refunded out of band",
                    order.id
                )));
            },
        }
        let (order, refund) = tx
            .add_refund(order.id, NewOrderRefund {
                amount_cents: amount,
                reason: reason.clone(),
                reference: reference.clone(),
                metadata: refund_meta,
            })
            .await?;
        let status = status_after_refund(order.refunded_cents.value(), order.total_cents.value());
        let mut order = tx.update_order_status(order.id, status, now).await?;
        if status == OrderStatus::Refunded {
            let mut patch = Metadata::new();
            patch.insert("cancelled_by".into(), json!(caller.user_id));
            patch.insert("cancel_reason".into(), json!("refund_completed"));
            order = tx.merge_order_metadata(order.id, patch).await?;
        }
        tx.append_audit(NewAuditEntry::order(
            Some(caller.user_id),
            "order.refund",
            order.id,
            json!({
                "refund_id": refund.id,
                "amount_cents": amount,
                "reference": reference,
                "refunded_cents": order.refunded_cents,
                "status": status,
            }),
        ))
        .await?;
        tx.commit().await?;
        info!("🔄️ Refunded {amount} on order {}. It is now {status}", order.number);
        self.producers.order_refunded(OrderRefundedEvent::new(order.clone(), refund.clone())).await;
        Ok(RefundResult { order, refund, balance_transaction })
    }

    /// Applies a payment result reported by a gateway. The report must already be authenticated; see
    /// [`Self::handle_webhook`] for the signed entry point.
    ///
    /// Reporting the status a payment already has is harmless: nothing transitions, coupon redemptions are brought in
    /// line and a paid order gets its subscription if it somehow lacks one. Reporting a different final status for a
    /// payment that is already final is rejected with [`BillingError::InvalidState`].
    pub async fn payment_callback(&self, callback: PaymentCallback) -> Result<SettlementResult, BillingError> {
        if callback.status == PaymentStatus::Pending {
            return Err(BillingError::InvalidArgument("A payment callback must report succeeded or failed".into()));
        }
        let order = self.db.fetch_order(callback.order_id).await?.ok_or_else(|| order_not_found(callback.order_id))?;
        let payment = self
            .db
            .fetch_payment(callback.payment_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment {}", callback.payment_id)))?;
        if payment.order_id != order.id {
            return Err(BillingError::InvalidArgument(format!(
                "Payment {} does not belong to order {}",
                payment.id, order.id
            )));
        }
        let now = Utc::now();
        let report = PaymentReport {
            status: callback.status,
            reference: non_empty(callback.reference.as_deref()),
            failure_code: non_empty(callback.failure_code.as_deref()),
            failure_message: non_empty(callback.failure_message.as_deref()),
            paid_at: callback.paid_at,
            metadata: Metadata::from_iter([("last_callback_at".to_string(), json!(now.to_rfc3339()))]),
            actor_id: None,
            source: "callback",
        };
        let mut tx = self.db.begin().await?;
        let applied = apply_payment_report(&mut tx, order.id, payment.id, report, now).await?;
        tx.commit().await?;
        self.publish_settlement(&applied).await;
        Ok(applied.into())
    }

    /// The unauthenticated webhook entry point. The raw body is checked against the channel's signature settings
    /// before it is parsed.
    pub async fn handle_webhook(
        &self,
        channel_code: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<SettlementResult, BillingError> {
        let channel = self
            .db
            .fetch_channel(channel_code)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment channel {channel_code}")))?;
        let headers = headers.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())).collect::<HashMap<_, _>>();
        if let Err(e) = self.gateway.verify_webhook(&channel, &headers, body) {
            warn!("🔄️ Webhook for channel {} rejected: {e}", channel.code);
            return Err(e.into());
        }
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| BillingError::InvalidArgument(format!("Malformed webhook body. {e}")))?;
        let status = match canonical_status(&envelope.status) {
            Some(s @ (PaymentStatus::Succeeded | PaymentStatus::Failed)) => s,
            _ => {
                return Err(BillingError::InvalidArgument(format!(
                    "Webhook status '{}' is not a final payment status",
                    envelope.status
                )))
            },
        };
        let payment = self
            .db
            .fetch_payment(envelope.payment_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment {}", envelope.payment_id)))?;
        if !payment.provider.eq_ignore_ascii_case(&channel.code) {
            return Err(BillingError::InvalidArgument(format!(
                "Payment {} was not made through channel {}",
                payment.id, channel.code
            )));
        }
        debug!("🔄️ Verified webhook from {} for payment {}: {status}", channel.code, payment.id);
        self.payment_callback(PaymentCallback {
            order_id: envelope.order_id,
            payment_id: envelope.payment_id,
            status,
            reference: envelope.reference,
            failure_code: envelope.failure_code,
            failure_message: envelope.failure_message,
            paid_at: envelope.paid_at,
        })
        .await
    }

    /// Asks the gateway for the current state of a payment and applies it under the same rules as a callback. A
    /// pending answer only records the check on the payment.
    pub async fn reconcile(
        &self,
        caller: &Caller,
        order_id: i64,
        payment_id: i64,
    ) -> Result<SettlementResult, BillingError> {
        require_admin(caller)?;
        let order = self.db.fetch_order(order_id).await?.ok_or_else(|| order_not_found(order_id))?;
        let payment = self
            .db
            .fetch_payment(payment_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment {payment_id}")))?;
        if payment.order_id != order.id {
            return Err(BillingError::InvalidArgument(format!(
                "Payment {payment_id} does not belong to order {order_id}"
            )));
        }
        let channel = self
            .db
            .fetch_channel(&payment.provider)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Payment channel {}", payment.provider)))?;
        let outcome = self.gateway.reconcile(&channel, &gateway_context(&order, &payment)).await?;
        let now = Utc::now();
        let mut metadata =
            outcome.metadata.into_iter().map(|(k, v)| (format!("reconcile_{k}"), v)).collect::<Metadata>();
        metadata.insert("reconciled_at".into(), json!(now.to_rfc3339()));
        let report = PaymentReport {
            status: outcome.status.unwrap_or(PaymentStatus::Pending),
            reference: outcome.reference,
            failure_code: outcome.failure_code,
            failure_message: outcome.failure_message,
            paid_at: None,
            metadata,
            actor_id: Some(caller.user_id),
            source: "reconcile",
        };
        let mut tx = self.db.begin().await?;
        let applied = apply_payment_report(&mut tx, order.id, payment.id, report, now).await?;
        tx.commit().await?;
        self.publish_settlement(&applied).await;
        Ok(applied.into())
    }

    async fn publish_settlement(&self, applied: &AppliedReport) {
        match applied.transition {
            Some(PaymentStatus::Succeeded) => {
                let event = OrderPaidEvent::new(applied.order.clone(), applied.subscription.clone());
                self.producers.order_paid(event).await;
            },
            Some(PaymentStatus::Failed) if applied.order.status == OrderStatus::PaymentFailed => {
                let reason = applied.payment.failure_message.clone();
                self.producers.order_annulled(OrderAnnulledEvent::new(applied.order.clone(), reason)).await;
            },
            _ => {},
        }
    }
}

async fn apply_payment_report<X: BillingTransaction>(
    tx: &mut X,
    order_id: i64,
    payment_id: i64,
    report: PaymentReport,
    now: DateTime<Utc>,
) -> Result<AppliedReport, BillingError> {
    let order = tx.fetch_order_for_update(order_id).await?.ok_or_else(|| order_not_found(order_id))?;
    let payment = tx
        .fetch_payment(payment_id)
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("Payment {payment_id}")))?;
    let update = PaymentRecordUpdate::metadata_only(report.metadata).with_reference(report.reference.clone());

    if report.status == PaymentStatus::Pending {
        let payment = tx.update_payment_record(payment.id, update).await?;
        debug!("🔄️ Payment {payment_id} is still pending according to {}", report.source);
        return Ok(AppliedReport { order, payment, subscription: None, transition: None });
    }
    if report.status == payment.status {
        let payment = tx.update_payment_record(payment.id, update).await?;
        let mut subscription = None;
        if report.status == PaymentStatus::Succeeded {
            apply_redemptions(tx, order.id).await?;
            if order.status == OrderStatus::Paid {
                let provisioned = ensure_order_subscription(tx, order.id, now).await?;
                if provisioned.action != SubscriptionAction::Existing {
                    warn!("🔄️ Paid order {} had no subscription. Provisioned one on replay.", order.id);
                    tx.append_audit(NewAuditEntry::order(
                        report.actor_id,
                        "order.subscription_restored",
                        order.id,
                        json!({ "subscription_id": provisioned.subscription.id, "source": report.source }),
                    ))
                    .await?;
                }
                subscription = Some(provisioned.subscription);
            }
        } else {
            release_redemptions(tx, order.id).await?;
        }
        let order = tx.fetch_order_for_update(order.id).await?.ok_or_else(|| order_not_found(order_id))?;
        debug!("🔄️ Payment {payment_id} is already {}. Replayed {} without a transition", payment.status, report.source);
        return Ok(AppliedReport { order, payment, subscription, transition: None });
    }
    if payment.status != PaymentStatus::Pending {
        warn!(
            "🔄️ Rejected {} moving payment {payment_id} from {} to {}",
            report.source, payment.status, report.status
        );
        return Err(BillingError::InvalidState(format!("Payment {payment_id} is already {}", payment.status)));
    }

    let (payment, subscription) = if report.status == PaymentStatus::Succeeded {
        if !status_allows_transition(order.status, OrderStatus::Paid) {
            warn!("🔄️ Payment {payment_id} succeeded, but order {} is {} and cannot be paid", order.id, order.status);
            let msg = format!("Order {} is {} and cannot be paid", order.id, order.status);
            return Err(BillingError::InvalidState(msg));
        }
        let paid_at = report.paid_at.unwrap_or(now);
        let payment = tx
            .update_payment_record(payment.id, update.with_status(PaymentStatus::Succeeded).with_processed_at(paid_at))
            .await?;
        let reference = report.reference.clone().or_else(|| payment.reference.clone());
        tx.update_payment_state(order.id, PaymentStateUpdate::succeeded(paid_at).with_reference(reference)).await?;
        let provisioned = ensure_order_subscription(tx, order.id, now).await?;
        apply_redemptions(tx, order.id).await?;
        tx.append_audit(NewAuditEntry::order(
            report.actor_id,
            "order.payment_succeeded",
            order.id,
            json!({
                "payment_id": payment.id,
                "reference": payment.reference,
                "source": report.source,
                "subscription_id": provisioned.subscription.id,
            }),
        ))
        .await?;
        (payment, Some(provisioned.subscription))
    } else {
        let update = update
            .with_status(PaymentStatus::Failed)
            .with_failure(report.failure_code.clone(), report.failure_message.clone())
            .with_processed_at(now);
        let payment = tx.update_payment_record(payment.id, update).await?;
        if status_allows_transition(order.status, OrderStatus::PaymentFailed) {
            let state = PaymentStateUpdate::failed(report.failure_code.clone(), report.failure_message.clone());
            tx.update_payment_state(order.id, state).await?;
            release_redemptions(tx, order.id).await?;
        } else {
            debug!("🔄️ Order {} is {}. Only payment {payment_id} is marked as failed", order.id, order.status);
        }
        tx.append_audit(NewAuditEntry::order(
            report.actor_id,
            "order.payment_failed",
            order.id,
            json!({
                "payment_id": payment.id,
                "failure_code": report.failure_code,
                "failure_message": report.failure_message,
                "source": report.source,
            }),
        ))
        .await?;
        (payment, None)
    };
    let order = tx.fetch_order_for_update(order.id).await?.ok_or_else(|| order_not_found(order_id))?;
    debug!("🔄️ Payment {payment_id} is now {} and order {} is {}", payment.status, order.id, order.status);
    Ok(AppliedReport { order, payment, subscription, transition: Some(report.status) })
}
