//! Event bus: in-process publish/subscribe with an optional broker bridge

pub mod bus;
pub mod envelope;

pub use bus::{handler_fn, EventBus, EventHandler, FnHandler, HandlerError, SubscriptionHandle};
pub use envelope::EventEnvelope;
