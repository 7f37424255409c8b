//! Normalised form of a payment channel's `config`.
//!
//! A channel describes its gateway entirely as data: where to send requests, what they look like, where to find the
//! interesting fields in the response, and how its webhooks are signed. [`GatewayDescriptor::parse`] validates that
//! description once and fills in defaults so that the engine never has to second-guess it.
use std::collections::BTreeMap;

use billing_common::{normalize_currency, Secret};
use serde_json::{Map, Value};

use super::errors::GatewayError;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    Json,
    Form,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    HmacSha256,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpSpec {
    pub endpoint: String,
    pub method: String,
    pub body_type: BodyType,
    pub headers: Map<String, Value>,
    pub payload: Value,
    pub timeout_seconds: u64,
}

/// Paths into the initiate response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponsePaths {
    pub pay_url: String,
    pub qr_code: String,
    pub intent_id: String,
    pub reference: String,
}

/// Paths into a refund or reconcile response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPaths {
    pub status: String,
    pub reference: String,
    pub failure_code: String,
    pub failure_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationSpec {
    pub http: HttpSpec,
    pub response: StatusPaths,
    /// Gateway status (lower-cased) to our vocabulary, applied before canonicalisation.
    pub status_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookSpec {
    pub signature_type: SignatureType,
    pub signature_header: String,
    pub secret: Secret<String>,
}

impl WebhookSpec {
    /// Verification only happens when both a header name and a secret are configured.
    pub fn is_enforced(&self) -> bool {
        !self.signature_header.is_empty() && !self.secret.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayDescriptor {
    pub mode: GatewayMode,
    pub notify_url: String,
    pub return_url: String,
    /// Overrides the order currency in requests when set.
    pub currency: Option<String>,
    pub http: HttpSpec,
    pub response: ResponsePaths,
    pub webhook: Option<WebhookSpec>,
    pub refund: Option<OperationSpec>,
    pub reconcile: Option<OperationSpec>,
}

impl GatewayDescriptor {
    /// Parses a channel config. `default_timeout` applies wherever a `timeout_seconds` is missing or zero.
    pub fn parse(config: &Value, default_timeout: u64) -> Result<Self, GatewayError> {
        let empty = Map::new();
        let root = match config {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(GatewayError::InvalidDescriptor("channel config must be a mapping".into())),
        };
        let mode = match text(root, "mode").to_ascii_lowercase().as_str() {
            "" | "http" => GatewayMode::Http,
            other => return Err(GatewayError::InvalidDescriptor(format!("unsupported mode '{other}'"))),
        };
        let currency = match text(root, "currency") {
            c if c.is_empty() => None,
            c => Some(normalize_currency(&c).map_err(|e| GatewayError::InvalidDescriptor(e.to_string()))?),
        };
        let response = match root.get("response") {
            Some(Value::Object(r)) => ResponsePaths {
                pay_url: text(r, "pay_url"),
                qr_code: text(r, "qr_code"),
                intent_id: text(r, "intent_id"),
                reference: text(r, "reference"),
            },
            _ => ResponsePaths::default(),
        };
        let webhook = match root.get("webhook") {
            Some(Value::Object(w)) => Some(parse_webhook(w)?),
            _ => None,
        };
        Ok(Self {
            mode,
            notify_url: text(root, "notify_url"),
            return_url: text(root, "return_url"),
            currency,
            http: parse_http(root.get("http"), default_timeout)?,
            response,
            webhook,
            refund: parse_operation(root.get("refund"), default_timeout)?,
            reconcile: parse_operation(root.get("reconcile"), default_timeout)?,
        })
    }
}

fn text(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn parse_http(value: Option<&Value>, default_timeout: u64) -> Result<HttpSpec, GatewayError> {
    let empty = Map::new();
    let http = match value {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => &empty,
        Some(_) => return Err(GatewayError::InvalidDescriptor("http must be a mapping".into())),
    };
    let method = match text(http, "method").to_ascii_uppercase() {
        m if m.is_empty() => "POST".to_string(),
        m => m,
    };
    let body_type = match text(http, "body_type").to_ascii_lowercase().as_str() {
        "" | "json" => BodyType::Json,
        "form" => BodyType::Form,
        other => return Err(GatewayError::InvalidDescriptor(format!("unsupported body_type '{other}'"))),
    };
    let headers = match http.get("headers") {
        Some(Value::Object(h)) => h.clone(),
        _ => Map::new(),
    };
    let timeout_seconds = match http.get("timeout_seconds") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    let timeout_seconds = if timeout_seconds == 0 { default_timeout } else { timeout_seconds };
    Ok(HttpSpec {
        endpoint: text(http, "endpoint"),
        method,
        body_type,
        headers,
        payload: http.get("payload").cloned().unwrap_or(Value::Null),
        timeout_seconds,
    })
}

fn parse_operation(value: Option<&Value>, default_timeout: u64) -> Result<Option<OperationSpec>, GatewayError> {
    let op = match value {
        Some(Value::Object(map)) => map,
        None | Some(Value::Null) => return Ok(None),
        Some(_) => return Err(GatewayError::InvalidDescriptor("refund/reconcile must be mappings".into())),
    };
    let response = match op.get("response") {
        Some(Value::Object(r)) => StatusPaths {
            status: text(r, "status"),
            reference: text(r, "reference"),
            failure_code: text(r, "failure_code"),
            failure_message: text(r, "failure_message"),
        },
        _ => StatusPaths::default(),
    };
    let status_map = match op.get("status_map") {
        Some(Value::Object(m)) => m
            .iter()
            .map(|(k, v)| {
                let target = match v {
                    Value::String(s) => s.trim().to_ascii_lowercase(),
                    other => other.to_string(),
                };
                (k.trim().to_ascii_lowercase(), target)
            })
            .collect(),
        _ => BTreeMap::new(),
    };
    Ok(Some(OperationSpec { http: parse_http(op.get("http"), default_timeout)?, response, status_map }))
}

fn parse_webhook(w: &Map<String, Value>) -> Result<WebhookSpec, GatewayError> {
    let signature_type = match text(w, "signature_type").to_ascii_lowercase().as_str() {
        "" | "hmac_sha256" | "hmac-sha256" => SignatureType::HmacSha256,
        other => return Err(GatewayError::InvalidDescriptor(format!("unsupported signature_type '{other}'"))),
    };
    Ok(WebhookSpec {
        signature_type,
        signature_header: text(w, "signature_header"),
        secret: Secret::new(text(w, "secret")),
    })
}
