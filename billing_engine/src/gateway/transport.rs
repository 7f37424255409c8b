use std::time::Duration;

use log::*;
use reqwest::{redirect, Client, Method};
use serde_json::Value;

use super::{errors::GatewayError, template::value_to_string};

#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// A fully expanded outbound gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<HttpBody>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends gateway requests. Dropping the returned future abandons the request.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;
}

/// [`HttpTransport`] over a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(max_redirects: usize) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(max_redirects))
            .build()
            .map_err(|e| GatewayError::Transport(format!("Could not build HTTP client. {e}")))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| GatewayError::InvalidDescriptor(format!("Unsupported HTTP method {}", request.method)))?;
        let is_get = method == Method::GET;
        let mut builder = self.client.request(method, &request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            None => builder,
            Some(HttpBody::Form(pairs)) if is_get => builder.query(&pairs),
            Some(HttpBody::Form(pairs)) => builder.form(&pairs),
            Some(HttpBody::Json(Value::Object(map))) if is_get => {
                let pairs = map.iter().map(|(k, v)| (k.clone(), value_to_string(v))).collect::<Vec<_>>();
                builder.query(&pairs)
            },
            Some(HttpBody::Json(_)) if is_get => builder,
            Some(HttpBody::Json(value)) => builder.json(&value),
        };
        trace!("💳️ Sending {} {}", request.method, request.url);
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(GatewayResponse { status, body })
    }
}
