//! Billing engine
//!
//! The order lifecycle and payment settlement core of the subscription panel. It is transport-agnostic: the HTTP
//! server is one client of this library.
//!
//! The library is organised in layers:
//! 1. Data types and transition rules ([`mod@db_types`], [`mod@state_machine`]). Money is always integer
//!    [`Cents`](billing_common::Cents).
//! 2. Storage ([`mod@db`]). The [`BillingDatabase`] and [`BillingTransaction`] traits describe what the flows need;
//!    SQLite is the supplied backend.
//! 3. Domain services: the payment gateway descriptor engine ([`mod@gateway`]), the coupon evaluator
//!    ([`mod@coupons`]) and the subscription provisioner ([`mod@provisioning`]).
//! 4. The public API ([`mod@billing_api`]). [`OrderFlowApi`] runs every order flow in a single transaction per
//!    request and publishes [`mod@events`] once the transaction has committed.
pub mod billing_api;
pub mod coupons;
pub mod db;
pub mod db_types;
pub mod events;
pub mod gateway;
pub mod helpers;
pub mod provisioning;
pub mod state_machine;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use billing_api::{
    errors::BillingError,
    identity::Caller,
    order_flow_api::OrderFlowApi,
    order_objects,
};
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use db::{
    errors::StoreError,
    traits::{BillingDatabase, BillingTransaction},
};
