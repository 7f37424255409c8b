//! Hooks for reacting to settled orders.
//!
//! Events are published only after the transaction that produced them has committed, so a handler never sees a state
//! that was later rolled back.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
