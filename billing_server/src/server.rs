use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use billing_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    gateway::{GatewayEngine, ReqwestTransport},
    OrderFlowApi,
    SqliteDatabase,
};
use log::*;

use crate::{
    auth::{TokenIssuer, TokenValidator},
    config::ServerConfig,
    errors::ServerError,
    routes::{configure_api, health},
};

const EVENT_BUFFER_SIZE: usize = 25;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, config.db_max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    if config.run_migrations {
        db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    } else {
        info!("🚀️ Skipping database migrations. BILLING_RUN_MIGRATIONS is off.");
    }
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers();
    let srv = create_server_instance(config, db, producers)?;
    srv.await.map_err(ServerError::IOError)
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let transport = ReqwestTransport::new(config.gateway_max_redirects)
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let auth = config.auth.clone();
    let gateway_timeout = config.gateway_timeout;
    let srv = HttpServer::new(move || {
        let gateway = GatewayEngine::new(transport.clone()).with_default_timeout(gateway_timeout);
        let orders_api = OrderFlowApi::new(db.clone(), gateway, producers.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("billing::access_log"))
            .app_data(json_config())
            .app_data(web::Data::new(orders_api))
            .app_data(web::Data::new(TokenValidator::new(&auth)))
            .app_data(web::Data::new(TokenIssuer::new(&auth)))
            .service(health)
            .configure(configure_api::<SqliteDatabase, ReqwestTransport>)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Malformed JSON bodies are reported in the same `{"error": ...}` shape as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into())
}

/// Hooks that record order events in the log. This is where notifications to users would be sent from.
pub fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_order_paid(|ev| {
            Box::pin(async move {
                let subscription = ev.subscription.as_ref().map(|s| s.id.to_string()).unwrap_or_else(|| "none".into());
                info!("📬️ Order {} paid. Subscription: {subscription}", ev.order.number);
            })
        })
        .on_order_annulled(|ev| {
            Box::pin(async move {
                let reason = ev.reason.as_deref().unwrap_or("no reason given");
                info!("📬️ Order {} is now {} ({reason})", ev.order.number, ev.status);
            })
        })
        .on_order_refunded(|ev| {
            Box::pin(async move {
                info!(
                    "📬️ Refunded {} on order {}. {} refunded in total",
                    ev.refund.amount_cents, ev.order.number, ev.order.refunded_cents
                );
            })
        });
    hooks
}
