//! # Billing server
//! This crate hosts the HTTP adapter for the billing engine. It is responsible for:
//! * Authenticating callers from their bearer token and turning them into a [`billing_engine::Caller`].
//! * Exposing the order flows of [`billing_engine::OrderFlowApi`] as JSON endpoints.
//! * Receiving signed payment gateway webhooks.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! See [routes](routes/index.html) for the full list. `/health` returns a 200 OK response.
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
