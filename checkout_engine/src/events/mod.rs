//! Outbound notifications.
//!
//! The engine publishes [`OrderConfirmedEvent`] and [`TransactionFailedEvent`] to whoever subscribed through
//! [`EventHooks`]. Publishing is fire-and-forget: a slow or failing subscriber never rolls back or delays a
//! confirmation beyond the channel hand-off.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
