//! Storage contracts for the billing engine.
//!
//! [`BillingDatabase`] covers connection-level, read-only access. Anything that mutates state goes through a
//! [`BillingTransaction`] obtained from [`BillingDatabase::begin`], which holds the backend's write lock until it is
//! committed or dropped. Dropping a transaction without committing rolls it back.
mod billing_database;
mod billing_transaction;

pub use billing_database::BillingDatabase;
pub use billing_transaction::BillingTransaction;
