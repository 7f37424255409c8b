use actix_web::{http::StatusCode, test, test::TestRequest, web, App};
use billing_engine::{
    events::EventProducers,
    gateway::GatewayEngine,
    test_utils::{
        fixtures::seed_billing_data,
        prepare_env::{prepare_test_env, random_db_path, tear_down},
    },
    Caller,
    OrderFlowApi,
    SqliteDatabase,
};
use log::debug;
use serde_json::Value;

use super::mocks::MockTransport;
use crate::{
    auth::{TokenIssuer, TokenValidator},
    config::AuthConfig,
    routes::{configure_api, health},
    server::json_config,
};

// DO NOT re-use this secret anywhere.
const TEST_JWT_SECRET: &str = "endpoint-tests-only-3c41e1b8d5";

pub type TestApi = OrderFlowApi<SqliteDatabase, MockTransport>;

pub fn auth_config() -> AuthConfig {
    AuthConfig::new(TEST_JWT_SECRET)
}

pub fn issue_token(caller: &Caller) -> String {
    TokenIssuer::new(&auth_config()).issue_token(caller).expect("Failed to sign token")
}

pub fn bearer(caller: &Caller) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", issue_token(caller)))
}

/// A seeded scratch database behind an order flow API that talks to `transport`.
pub struct TestEnv {
    pub api: web::Data<TestApi>,
    db: SqliteDatabase,
}

impl TestEnv {
    pub async fn new(transport: MockTransport) -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        seed_billing_data(&db).await;
        let api = OrderFlowApi::new(db.clone(), GatewayEngine::new(transport), EventProducers::default());
        Self { api: web::Data::new(api), db }
    }

    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let app = App::new()
            .app_data(json_config())
            .app_data(self.api.clone())
            .app_data(web::Data::new(TokenValidator::new(&auth_config())))
            .service(health)
            .configure(configure_api::<SqliteDatabase, MockTransport>);
        let service = test::init_service(app).await;
        debug!("Making request");
        let res = test::call_service(&service, req.to_request()).await;
        let status = res.status();
        let body = test::read_body(res).await;
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    /// Sends the request and parses the response body as JSON.
    pub async fn send_json(&self, req: TestRequest) -> (StatusCode, Value) {
        let (status, body) = self.send(req).await;
        let json = serde_json::from_str(&body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"));
        (status, json)
    }

    pub async fn tear_down(self) {
        let Self { api, db } = self;
        drop(api);
        tear_down(db).await;
    }
}
