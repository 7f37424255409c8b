//! # Gateway descriptor engine
//!
//! Payment providers are not coded; they are described. Each [`PaymentChannel`] carries a JSON config that
//! [`GatewayDescriptor::parse`] turns into a normalised descriptor, and [`GatewayEngine`] interprets it to initiate
//! payments, request refunds and reconcile payment state over HTTP.
//!
//! Outbound calls go through an [`HttpTransport`], so tests and alternative clients can be swapped in.
use std::collections::HashMap;

use billing_common::Cents;
use chrono::Utc;
use log::*;
use serde_json::{json, Value};

use crate::db_types::{Metadata, Order, OrderPayment, PaymentChannel, PaymentStatus};

pub mod descriptor;
pub mod errors;
pub mod template;
pub mod transport;
pub mod webhook;

pub use descriptor::{GatewayDescriptor, DEFAULT_TIMEOUT_SECONDS};
pub use errors::GatewayError;
pub use transport::{GatewayRequest, GatewayResponse, HttpBody, HttpTransport, ReqwestTransport};

use self::{
    descriptor::{BodyType, HttpSpec, OperationSpec},
    template::{expand_str, expand_value, lookup_path, value_to_string, TemplateVars},
};

/// What the engine needs to know about the payment being worked on.
#[derive(Debug, Clone, Copy)]
pub struct GatewayContext<'a> {
    pub order: &'a Order,
    pub payment: &'a OrderPayment,
    pub plan_id: Option<i64>,
    pub plan_name: &'a str,
    pub quantity: i64,
    /// Caller-supplied return URL. Falls back to the descriptor's `return_url` when empty.
    pub return_url: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitiateOutcome {
    pub metadata: Metadata,
    pub reference: Option<String>,
}

/// Result of a refund or reconcile call, read through the operation's response paths.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementOutcome {
    /// Canonical status. `None` when the gateway's status maps to nothing we recognise.
    pub status: Option<PaymentStatus>,
    pub raw_status: String,
    pub reference: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub metadata: Metadata,
}

/// Maps the many spellings gateways use onto [`PaymentStatus`].
pub fn canonical_status(status: &str) -> Option<PaymentStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "succeeded" | "success" | "paid" | "ok" => Some(PaymentStatus::Succeeded),
        "failed" | "fail" | "error" | "invalid" => Some(PaymentStatus::Failed),
        "pending" | "processing" | "in_progress" => Some(PaymentStatus::Pending),
        _ => None,
    }
}

struct GatewayReply {
    status: u16,
    raw: String,
    json: Value,
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub struct GatewayEngine<T> {
    transport: T,
    default_timeout: u64,
}

impl<T> GatewayEngine<T>
where T: HttpTransport
{
    pub fn new(transport: T) -> Self {
        Self { transport, default_timeout: DEFAULT_TIMEOUT_SECONDS }
    }

    /// Timeout applied to calls whose descriptor does not set `timeout_seconds`.
    pub fn with_default_timeout(mut self, seconds: u64) -> Self {
        self.default_timeout = seconds.max(1);
        self
    }

    pub fn descriptor(&self, channel: &PaymentChannel) -> Result<GatewayDescriptor, GatewayError> {
        GatewayDescriptor::parse(&channel.config, self.default_timeout)
    }

    /// Starts a payment with the gateway and extracts where the user should be sent to pay.
    pub async fn initiate(
        &self,
        channel: &PaymentChannel,
        ctx: &GatewayContext<'_>,
    ) -> Result<InitiateOutcome, GatewayError> {
        let descriptor = self.descriptor(channel)?;
        if descriptor.http.endpoint.is_empty() {
            return Err(GatewayError::InvalidRequest(format!("channel {} has no endpoint", channel.code)));
        }
        let vars = substitution_vars(&descriptor, channel, ctx);
        let reply = self.call(&descriptor.http, &vars).await?;
        let paths = &descriptor.response;
        let pay_url = lookup_path(&reply.json, &reply.raw, &paths.pay_url);
        let qr_code = lookup_path(&reply.json, &reply.raw, &paths.qr_code);
        if pay_url.is_empty() && qr_code.is_empty() {
            warn!("💳️ Gateway {} returned neither a pay_url nor a qr_code for order {}", channel.code, ctx.order.number);
            return Err(GatewayError::InvalidRequest("gateway response has neither pay_url nor qr_code".into()));
        }
        let intent_id = lookup_path(&reply.json, &reply.raw, &paths.intent_id);
        let reference = non_empty(lookup_path(&reply.json, &reply.raw, &paths.reference));
        let mut metadata = Metadata::new();
        if !pay_url.is_empty() {
            metadata.insert("pay_url".into(), Value::String(pay_url));
        }
        if !qr_code.is_empty() {
            metadata.insert("qr_code".into(), Value::String(qr_code));
        }
        if !intent_id.is_empty() {
            metadata.insert("gateway_intent_id".into(), Value::String(intent_id));
        }
        if let Some(r) = &reference {
            metadata.insert("gateway_reference".into(), Value::String(r.clone()));
        }
        metadata.insert("gateway_http_status".into(), json!(reply.status));
        metadata.insert("initiated_at".into(), Value::String(Utc::now().to_rfc3339()));
        info!("💳️ Payment {} initiated with {} for order {}", ctx.payment.id, channel.code, ctx.order.number);
        Ok(InitiateOutcome { metadata, reference })
    }

    /// Asks the gateway to refund `amount`. Anything other than a succeeded (or unrecognised) status is a rejection.
    pub async fn refund(
        &self,
        channel: &PaymentChannel,
        ctx: &GatewayContext<'_>,
        amount: Cents,
        reason: &str,
    ) -> Result<SettlementOutcome, GatewayError> {
        if !amount.is_positive() {
            return Err(GatewayError::InvalidRequest("refund amount must be positive".into()));
        }
        let descriptor = self.descriptor(channel)?;
        let op = descriptor.refund.as_ref().ok_or(GatewayError::NotConfigured("refund"))?;
        let mut vars = substitution_vars(&descriptor, channel, ctx);
        vars.insert("refund_amount_cents".into(), amount.value().to_string());
        vars.insert("refund_amount".into(), amount.to_string());
        vars.insert("refund_reason".into(), reason.to_string());
        let outcome = self.settlement_call(op, &vars).await?;
        match outcome.status {
            Some(PaymentStatus::Succeeded) | None => {
                info!("💳️ Gateway {} accepted a refund of {amount} for order {}", channel.code, ctx.order.number);
                Ok(outcome)
            },
            Some(status) => {
                warn!("💳️ Gateway {} answered a refund for order {} with {status}", channel.code, ctx.order.number);
                Err(GatewayError::Rejected(format!("refund status is {status} ({})", outcome.raw_status)))
            },
        }
    }

    /// Reads the current state of a payment from the gateway.
    pub async fn reconcile(
        &self,
        channel: &PaymentChannel,
        ctx: &GatewayContext<'_>,
    ) -> Result<SettlementOutcome, GatewayError> {
        let descriptor = self.descriptor(channel)?;
        let op = descriptor.reconcile.as_ref().ok_or(GatewayError::NotConfigured("reconcile"))?;
        let vars = substitution_vars(&descriptor, channel, ctx);
        let outcome = self.settlement_call(op, &vars).await?;
        if outcome.status.is_none() {
            warn!("💳️ Gateway {} reported an unrecognised status '{}'", channel.code, outcome.raw_status);
            return Err(GatewayError::Rejected(format!("unrecognised payment status '{}'", outcome.raw_status)));
        }
        Ok(outcome)
    }

    /// Verifies a webhook body against the channel's signature settings.
    pub fn verify_webhook(
        &self,
        channel: &PaymentChannel,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<(), GatewayError> {
        let descriptor = self.descriptor(channel)?;
        webhook::verify_signature(descriptor.webhook.as_ref(), headers, body)
    }

    async fn settlement_call(
        &self,
        op: &OperationSpec,
        vars: &TemplateVars,
    ) -> Result<SettlementOutcome, GatewayError> {
        if op.http.endpoint.is_empty() {
            return Err(GatewayError::InvalidRequest("operation has no endpoint".into()));
        }
        let reply = self.call(&op.http, vars).await?;
        let raw_status = lookup_path(&reply.json, &reply.raw, &op.response.status);
        let mapped = op.status_map.get(&raw_status.to_ascii_lowercase()).cloned().unwrap_or_else(|| raw_status.clone());
        let status = canonical_status(&mapped);
        let reference = non_empty(lookup_path(&reply.json, &reply.raw, &op.response.reference));
        let failure_code = non_empty(lookup_path(&reply.json, &reply.raw, &op.response.failure_code));
        let failure_message = non_empty(lookup_path(&reply.json, &reply.raw, &op.response.failure_message));
        let mut metadata = Metadata::new();
        metadata.insert("gateway_status".into(), Value::String(raw_status.clone()));
        metadata.insert("gateway_http_status".into(), json!(reply.status));
        if let Some(r) = &reference {
            metadata.insert("gateway_reference".into(), Value::String(r.clone()));
        }
        Ok(SettlementOutcome { status, raw_status, reference, failure_code, failure_message, metadata })
    }

    async fn call(&self, spec: &HttpSpec, vars: &TemplateVars) -> Result<GatewayReply, GatewayError> {
        let url = expand_str(&spec.endpoint, vars);
        let headers = spec
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value_to_string(&expand_value(value, vars))))
            .collect();
        let body = match (spec.body_type, expand_value(&spec.payload, vars)) {
            (_, Value::Null) => None,
            (BodyType::Json, payload) => Some(HttpBody::Json(payload)),
            (BodyType::Form, Value::Object(map)) => {
                Some(HttpBody::Form(map.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect()))
            },
            (BodyType::Form, _) => {
                return Err(GatewayError::InvalidDescriptor("a form payload must be a mapping".into()));
            },
        };
        let request = GatewayRequest {
            method: spec.method.clone(),
            url,
            headers,
            body,
            timeout: std::time::Duration::from_secs(spec.timeout_seconds),
        };
        debug!("💳️ Calling gateway: {} {}", request.method, request.url);
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            warn!("💳️ Gateway answered HTTP {}", response.status);
            return Err(GatewayError::HttpStatus { status: response.status, body: response.body });
        }
        let json = match response.body.trim() {
            "" => Value::Null,
            body => serde_json::from_str(body).unwrap_or(Value::Null),
        };
        Ok(GatewayReply { status: response.status, raw: response.body, json })
    }
}

fn substitution_vars(
    descriptor: &GatewayDescriptor,
    channel: &PaymentChannel,
    ctx: &GatewayContext<'_>,
) -> TemplateVars {
    let order = ctx.order;
    let payment = ctx.payment;
    let currency = descriptor.currency.clone().unwrap_or_else(|| order.currency.clone());
    let mut vars = TemplateVars::new();
    vars.insert("order_id".into(), order.id.to_string());
    vars.insert("order_number".into(), order.number.clone());
    vars.insert("amount".into(), payment.amount_cents.to_string());
    vars.insert("amount_cents".into(), payment.amount_cents.value().to_string());
    vars.insert("currency".into(), currency);
    vars.insert("user_id".into(), order.user_id.to_string());
    vars.insert("plan_id".into(), ctx.plan_id.map(|id| id.to_string()).unwrap_or_default());
    vars.insert("plan_name".into(), ctx.plan_name.to_string());
    vars.insert("quantity".into(), ctx.quantity.to_string());
    vars.insert("payment_id".into(), payment.id.to_string());
    vars.insert("payment_channel".into(), channel.code.clone());
    vars.insert("payment_provider".into(), channel.provider.clone());
    vars.insert("payment_intent_id".into(), payment.intent_id.clone().unwrap_or_default());
    vars.insert("timestamp".into(), Utc::now().timestamp().to_string());
    vars.insert("nonce".into(), crate::helpers::random_hex(16));
    let notify_url = expand_str(&descriptor.notify_url, &vars);
    let return_url = match ctx.return_url.map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => expand_str(&descriptor.return_url, &vars),
    };
    vars.insert("notify_url".into(), notify_url);
    vars.insert("return_url".into(), return_url);
    vars
}
