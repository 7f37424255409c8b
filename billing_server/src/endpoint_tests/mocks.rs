use billing_engine::gateway::{GatewayError, GatewayRequest, GatewayResponse, HttpTransport};
use mockall::mock;
use serde_json::json;

mock! {
    pub Transport {}
    impl HttpTransport for Transport {
        async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;
    }
}

/// A transport that answers every initiate call on the seeded `alipay` channel with a pay URL.
pub fn initiating_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_send().withf(|r| r.url.starts_with("https://pay.test/create")).returning(|_| {
        Ok(GatewayResponse {
            status: 200,
            body: json!({"data": {"pay_url": "https://pay.test/redirect", "reference": "ref-001"}}).to_string(),
        })
    });
    transport
}

/// A transport that must never be called.
pub fn silent_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_send().never();
    transport
}
