use actix_web::{http::StatusCode, test::TestRequest};
use billing_engine::test_utils::fixtures::{admin, alice, bob, BASIC_PLAN, YEARLY_OPTION};
use serde_json::json;

use super::{
    helpers::{bearer, TestEnv},
    mocks::{initiating_transport, silent_transport},
};

#[actix_web::test]
async fn health_check() {
    let env = TestEnv::new(silent_transport()).await;
    let (status, body) = env.send(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
    env.tear_down().await;
}

#[actix_web::test]
async fn create_order_without_token() {
    let env = TestEnv::new(silent_transport()).await;
    let req = TestRequest::post().uri("/api/v1/orders").set_json(json!({"plan_id": BASIC_PLAN}));
    let (status, body) = env.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, r#"{"error":"Unauthorized"}"#);
    env.tear_down().await;
}

#[actix_web::test]
async fn balance_order_is_created_and_replayed() {
    let env = TestEnv::new(silent_transport()).await;
    let request = || {
        TestRequest::post()
            .uri("/api/v1/orders")
            .insert_header(bearer(&alice()))
            .insert_header(("Idempotency-Key", "checkout-1"))
            .set_json(json!({"plan_id": BASIC_PLAN}))
    };
    let (status, first) = env.send_json(request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["order"]["order"]["status"], "paid");
    assert_eq!(first["order"]["order"]["total_cents"], 2600);
    assert_eq!(first["order"]["order"]["idempotency_key"], "checkout-1");
    assert_eq!(first["balance"]["balance_cents"], 7400);
    assert_eq!(first["balance_transaction"]["amount_cents"], -2600);
    assert_eq!(first["replayed"], false);

    let (status, second) = env.send_json(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["replayed"], true);
    assert_eq!(second["order"]["order"]["id"], first["order"]["order"]["id"]);

    // a different key buys again, this time for a year
    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&alice()))
        .set_json(json!({"plan_id": BASIC_PLAN, "billing_option_id": YEARLY_OPTION, "idempotency_key": "checkout-2"}));
    let (status, body) = env.send_json(req).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED, "{body}");
    env.tear_down().await;
}

#[actix_web::test]
async fn insufficient_balance_is_payment_required() {
    let env = TestEnv::new(silent_transport()).await;
    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&bob()))
        .set_json(json!({"plan_id": BASIC_PLAN}));
    let (status, body) = env.send_json(req).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "Insufficient balance. Required 26.00, available 5.00");
    env.tear_down().await;
}

#[actix_web::test]
async fn malformed_bodies_are_bad_requests() {
    let env = TestEnv::new(silent_transport()).await;
    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&alice()))
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{\"plan_id\": ");
    let (status, body) = env.send_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Could not read request body"), "{body}");

    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&alice()))
        .set_json(json!({"plan_id": BASIC_PLAN, "quantity": 0}));
    let (status, body) = env.send_json(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request"), "{body}");
    env.tear_down().await;
}

#[actix_web::test]
async fn orders_are_visible_to_owner_and_admin() {
    let env = TestEnv::new(silent_transport()).await;
    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&alice()))
        .set_json(json!({"plan_id": BASIC_PLAN}));
    let (_, created) = env.send_json(req).await;
    let id = created["order"]["order"]["id"].as_i64().unwrap();
    let uri = format!("/api/v1/orders/{id}");

    let (status, detail) = env.send_json(TestRequest::get().uri(&uri).insert_header(bearer(&alice()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["order"]["id"], id);
    assert_eq!(detail["items"].as_array().map(Vec::len), Some(1));

    let (status, _) = env.send(TestRequest::get().uri(&uri).insert_header(bearer(&bob()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = env.send(TestRequest::get().uri(&uri).insert_header(bearer(&admin()))).await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/api/v1/orders/{id}/payment-status");
    let (status, view) = env.send_json(TestRequest::get().uri(&uri).insert_header(bearer(&alice()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "paid");
    assert_eq!(view["payment_status"], "succeeded");
    assert_eq!(view["payment_method"], "balance");

    let req = TestRequest::get().uri("/api/v1/orders/9999").insert_header(bearer(&alice()));
    let (status, body) = env.send_json(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Order 9999 not found");
    env.tear_down().await;
}

#[actix_web::test]
async fn external_order_lifecycle() {
    let env = TestEnv::new(initiating_transport()).await;
    let req = TestRequest::post().uri("/api/v1/orders").insert_header(bearer(&alice())).set_json(json!({
        "plan_id": BASIC_PLAN,
        "payment_method": "external",
        "payment_channel": "alipay",
    }));
    let (status, created) = env.send_json(req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["order"]["order"]["status"], "pending_payment");
    assert!(created.get("payment_error").is_none());
    assert_eq!(created["order"]["payments"][0]["metadata"]["pay_url"], "https://pay.test/redirect");
    let id = created["order"]["order"]["id"].as_i64().unwrap();

    let uri = format!("/api/v1/orders/{id}/mark-paid");
    let (status, _) = env.send(TestRequest::post().uri(&uri).insert_header(bearer(&alice()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/v1/orders/{id}/cancel");
    let req = TestRequest::post().uri(&uri).insert_header(bearer(&alice())).set_json(json!({"reason": "too slow"}));
    let (status, order) = env.send_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "cancelled");
    assert_eq!(order["metadata"]["cancel_reason"], "too slow");

    let (status, _) = env.send(TestRequest::post().uri(&uri).insert_header(bearer(&alice()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    env.tear_down().await;
}

#[actix_web::test]
async fn admin_settles_and_refunds() {
    let env = TestEnv::new(initiating_transport()).await;
    let req = TestRequest::post()
        .uri("/api/v1/orders")
        .insert_header(bearer(&alice()))
        .set_json(json!({"plan_id": BASIC_PLAN, "payment_method": "external", "payment_channel": "alipay"}));
    let (_, created) = env.send_json(req).await;
    let id = created["order"]["order"]["id"].as_i64().unwrap();

    let uri = format!("/api/v1/orders/{id}/mark-paid");
    let req = TestRequest::post().uri(&uri).insert_header(bearer(&admin())).set_json(json!({"charge_balance": true}));
    let (status, paid) = env.send_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["order"]["status"], "paid");
    assert_eq!(paid["order"]["payment_method"], "balance");
    assert_eq!(paid["balance_transaction"]["amount_cents"], -2600);
    assert_eq!(paid["subscription"]["user_id"], 1);

    let uri = format!("/api/v1/orders/{id}/refund");
    let req = TestRequest::post().uri(&uri).insert_header(bearer(&alice())).set_json(json!({"amount_cents": 100}));
    let (status, _) = env.send(req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = TestRequest::post().uri(&uri).insert_header(bearer(&admin())).set_json(json!({"amount_cents": 5000}));
    let (status, _) = env.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let req = TestRequest::post()
        .uri(&uri)
        .insert_header(bearer(&admin()))
        .set_json(json!({"amount_cents": 2600, "reason": "duplicate purchase"}));
    let (status, refunded) = env.send_json(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refunded["order"]["status"], "refunded");
    assert_eq!(refunded["refund"]["amount_cents"], 2600);
    assert_eq!(refunded["balance_transaction"]["amount_cents"], 2600);
    env.tear_down().await;
}
