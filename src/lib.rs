//! OMNIBUS - typed in-process event bus
//!
//! A publish/subscribe engine keyed by event runtime type, with a defined
//! total dispatch order, hierarchical fan-out, cancellation gating and
//! per-subscriber panic isolation.
//!
//! Architecture:
//! - [`EventBus`] keeps an insertion-ordered registry of subscriptions and a
//!   per-event-type index; one mutex serializes every structural mutation.
//! - Each event type with subscribers gets a compiled dispatcher: a sorted
//!   array of invocation adapters with precomputed cancellation gates.
//!   Dispatchers live in an immutable snapshot that publishers read without
//!   touching the registry mutex.
//! - Handlers come from [`Listener`] bindings (instance or type form) or are
//!   registered directly as single-event callbacks.
//!
//! Dispatch order within one event: `PostOrder` ascending, ties in
//! registration order. Ordering between distinct events is unspecified.

// Core bus machinery
mod dispatcher;
mod hierarchy;
mod registry;

// Public surface
pub mod bus;
pub mod event;
pub mod listener;
pub mod subscription;

// Re-export commonly used types
pub use bus::EventBus;
pub use event::{AsyncEvent, Cancellable, Event, EventType};
pub use listener::{Bindings, Listener};
pub use subscription::{Namespace, PostOrder, Subscribe, Subscription};
