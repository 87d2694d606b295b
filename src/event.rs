//! Event capability traits and the runtime type descriptor.
//!
//! The bus never looks inside an event. It observes exactly three things
//! through [`Event`]: the runtime type (for dispatcher lookup), the optional
//! [`Cancellable`] view (sampled between gated runs), and the
//! [`Event::post_dispatch`] hook (invoked once after all subscribers ran).
//! [`AsyncEvent`] additionally carries a completion handle that dispatch
//! returns to its caller without inspecting it.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A value that can be published through the bus.
///
/// Plain events only need `as_any`:
///
/// ```ignore
/// struct FrameLoaded { frame: usize }
///
/// impl Event for FrameLoaded {
///     fn as_any(&self) -> &dyn Any { self }
/// }
/// ```
///
/// Subtype events declare their supertypes in [`Event::parents`] and widen
/// themselves in [`Event::upcast`]; the two must describe the same hierarchy.
pub trait Event: Any + Send + Sync {
    /// The event as `Any`, for adapter downcasts.
    fn as_any(&self) -> &dyn Any;

    /// Hook invoked once after every subscriber of one dispatch has run.
    fn post_dispatch(&self) {}

    /// The cancellable view of this event, if it has one.
    fn cancellation(&self) -> Option<&dyn Cancellable> {
        None
    }

    /// Direct supertypes of this event type, for hierarchical fan-out.
    fn parents() -> Vec<EventType>
    where
        Self: Sized,
    {
        Vec::new()
    }

    /// View this event as ancestor type `target`, if the hierarchy allows it.
    ///
    /// Subtype events answer for their own type and forward everything else
    /// to the embedded parent value.
    fn upcast(&self, target: TypeId) -> Option<&dyn Any> {
        if target == self.as_any().type_id() {
            Some(self.as_any())
        } else {
            None
        }
    }
}

/// Capability of events that can be called off mid-dispatch.
///
/// Cancellation is a cooperative flag: the dispatcher samples it at the start
/// of each gated run of `ignore_cancelled` subscribers and never interrupts a
/// running handler.
pub trait Cancellable: Event {
    fn is_cancelled(&self) -> bool;
}

/// Capability of events that carry a completion handle.
///
/// The bus never inspects the handle. `dispatch_async` runs a normal
/// synchronous dispatch and then hands the handle back so callers can await
/// whatever the handlers agreed to resolve.
pub trait AsyncEvent: Event {
    type Done;

    fn done_future(&self) -> Self::Done;
}

/// Runtime descriptor of an event type: identity, display name, and the link
/// to its declared supertypes.
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
    parents: fn() -> Vec<EventType>,
}

impl EventType {
    pub fn of<E: Event>() -> Self {
        EventType {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
            parents: E::parents,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn parents(&self) -> Vec<EventType> {
        (self.parents)()
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
