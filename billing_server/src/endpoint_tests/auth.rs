use actix_web::{http::StatusCode, test::TestRequest};
use billing_engine::{test_utils::fixtures::alice, Caller};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use super::{
    helpers::{auth_config, issue_token, TestEnv},
    mocks::silent_transport,
};
use crate::auth::JwtClaims;

async fn status_with_authorization(env: &TestEnv, value: Option<String>) -> StatusCode {
    let mut req = TestRequest::get().uri("/api/v1/orders/1/payment-status");
    if let Some(v) = value {
        req = req.insert_header(("Authorization", v));
    }
    env.send(req).await.0
}

fn signed_claims(claims: &JwtClaims, secret: &str) -> String {
    encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

#[actix_web::test]
async fn bearer_tokens_are_required() {
    let env = TestEnv::new(silent_transport()).await;
    let token = issue_token(&alice());
    assert_eq!(status_with_authorization(&env, None).await, StatusCode::UNAUTHORIZED);
    assert_eq!(status_with_authorization(&env, Some(token.clone())).await, StatusCode::UNAUTHORIZED);
    assert_eq!(status_with_authorization(&env, Some(format!("Basic {token}"))).await, StatusCode::UNAUTHORIZED);
    assert_eq!(status_with_authorization(&env, Some("Bearer ".into())).await, StatusCode::UNAUTHORIZED);
    // a valid token gets past authentication; there is no order yet
    assert_eq!(status_with_authorization(&env, Some(format!("Bearer {token}"))).await, StatusCode::NOT_FOUND);
    env.tear_down().await;
}

#[actix_web::test]
async fn tampered_and_expired_tokens_are_rejected() {
    let env = TestEnv::new(silent_transport()).await;
    let mut token = issue_token(&alice());
    token.replace_range(token.len() - 10..token.len() - 5, "00000");
    assert_eq!(status_with_authorization(&env, Some(format!("Bearer {token}"))).await, StatusCode::UNAUTHORIZED);

    let secret = auth_config().jwt_secret.reveal().clone();
    let mut claims = JwtClaims::for_caller(&Caller::new(1, "alice@example.com"), Duration::hours(1));
    claims.exp = (Utc::now() - Duration::hours(1)).timestamp();
    let expired = signed_claims(&claims, &secret);
    assert_eq!(status_with_authorization(&env, Some(format!("Bearer {expired}"))).await, StatusCode::UNAUTHORIZED);

    let claims = JwtClaims::for_caller(&Caller::new(1, "alice@example.com"), Duration::hours(1));
    let foreign = signed_claims(&claims, "some-other-signing-secret");
    assert_eq!(status_with_authorization(&env, Some(format!("Bearer {foreign}"))).await, StatusCode::UNAUTHORIZED);
    env.tear_down().await;
}
