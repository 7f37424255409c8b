//! # Billing engine public API
//!
//! [`OrderFlowApi`] is the programmatic surface of the engine. It is generic over the storage backend and over the
//! HTTP transport used to talk to payment gateways, so that either can be replaced (tests use a stub transport).
//!
//! ```rust,ignore
//! use billing_engine::{OrderFlowApi, SqliteDatabase, gateway::{GatewayEngine, ReqwestTransport}};
//! let db = SqliteDatabase::new_with_url("sqlite://data/billing.db", 25).await?;
//! let gateway = GatewayEngine::new(ReqwestTransport::new(3)?);
//! let api = OrderFlowApi::new(db, gateway, EventProducers::default());
//! let result = api.create_order(&caller, CreateOrderRequest::new(plan_id)).await?;
//! ```
//!
//! Every operation takes the authenticated [`Caller`](identity::Caller), except the gateway callbacks which are
//! authenticated by signature instead.
pub mod errors;
pub mod identity;
pub mod order_flow_api;
pub mod order_objects;
mod settlement;
