use actix_web::{http::StatusCode, test::TestRequest};
use billing_engine::{
    gateway::webhook::compute_signature,
    test_utils::fixtures::{alice, BASIC_PLAN, WEBHOOK_SECRET},
};
use serde_json::{json, Value};

use super::{
    helpers::{bearer, TestEnv},
    mocks::initiating_transport,
};

/// Creates an external order for alice and returns `(order_id, payment_id)`.
async fn pending_order(env: &TestEnv) -> (i64, i64) {
    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&alice()))
        .set_json(json!({"plan_id": BASIC_PLAN, "payment_method": "external", "payment_channel": "alipay"}));
    let (status, created) = env.send_json(req).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    let order_id = created["order"]["order"]["id"].as_i64().unwrap();
    let payment_id = created["order"]["payments"][0]["id"].as_i64().unwrap();
    (order_id, payment_id)
}

fn webhook(channel: &str, body: &Value, signature: Option<String>) -> TestRequest {
    let mut req = TestRequest::post()
        .uri(&format!("/api/v1/payments/webhook/{channel}"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(body.to_string());
    if let Some(sig) = signature {
        req = req.insert_header(("X-Signature", sig));
    }
    req
}

fn sign(body: &Value) -> String {
    compute_signature(WEBHOOK_SECRET, body.to_string().as_bytes()).unwrap()
}

#[actix_web::test]
async fn signed_webhook_pays_the_order() {
    let env = TestEnv::new(initiating_transport()).await;
    let (order_id, payment_id) = pending_order(&env).await;
    let body = json!({"order_id": order_id, "payment_id": payment_id, "status": "success", "reference": "gw-77"});

    let (status, ack) = env.send_json(webhook("alipay", &body, Some(sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"received": true, "order_id": order_id, "payment_id": payment_id, "changed": true}));

    // gateways retry; the second delivery changes nothing
    let (status, ack) = env.send_json(webhook("alipay", &body, Some(sign(&body)))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["changed"], false);

    let uri = format!("/api/v1/orders/{order_id}/payment-status");
    let (_, view) = env.send_json(TestRequest::get().uri(&uri).insert_header(bearer(&alice()))).await;
    assert_eq!(view["status"], "paid");
    assert_eq!(view["payment_reference"], "gw-77");
    env.tear_down().await;
}

#[actix_web::test]
async fn unsigned_or_forged_webhooks_are_rejected() {
    let env = TestEnv::new(initiating_transport()).await;
    let (order_id, payment_id) = pending_order(&env).await;
    let body = json!({"order_id": order_id, "payment_id": payment_id, "status": "success"});

    let (status, text) = env.send(webhook("alipay", &body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text, r#"{"error":"Unauthorized"}"#);

    let forged = json!({"order_id": order_id, "payment_id": payment_id, "status": "failed"});
    let (status, _) = env.send(webhook("alipay", &body, Some(sign(&forged)))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/api/v1/orders/{order_id}/payment-status");
    let (_, view) = env.send_json(TestRequest::get().uri(&uri).insert_header(bearer(&alice()))).await;
    assert_eq!(view["status"], "pending_payment");
    env.tear_down().await;
}

#[actix_web::test]
async fn webhooks_for_unknown_channels_are_not_found() {
    let env = TestEnv::new(initiating_transport()).await;
    let body = json!({"order_id": 1, "payment_id": 1, "status": "success"});
    let (status, body) = env.send_json(webhook("paypal", &body, Some(sign(&body)))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Payment channel paypal not found");
    env.tear_down().await;
}
