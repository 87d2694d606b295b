//! The immutable subscription descriptor and its ordering.
//!
//! A [`Subscription`] records one registered handler: who owns it, where it
//! sits in the dispatch order, which event type it was declared for, and the
//! type-erased adapter that performs the actual call. Descriptors compare by
//! `(order, registration sequence)`, so sorting a per-event list is total and
//! ties fire in registration order.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use log::warn;
use uuid::Uuid;

use crate::event::{Event, EventType};

/// Position of a subscriber in the dispatch order of one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PostOrder {
    First,
    Early,
    #[default]
    Normal,
    Late,
    Last,
}

/// Options attached to one handler binding.
#[derive(Clone, Copy, Debug, Default)]
pub struct Subscribe {
    /// Position in the dispatch order.
    pub order: PostOrder,
    /// Subscribe to the exact declared type only, not its subtypes.
    pub exact_event: bool,
    /// Skip this handler while the event reports itself cancelled.
    pub ignore_cancelled: bool,
}

impl Subscribe {
    pub fn order(order: PostOrder) -> Self {
        Subscribe {
            order,
            ..Self::default()
        }
    }

    pub fn exact(mut self) -> Self {
        self.exact_event = true;
        self
    }

    pub fn ignoring_cancelled(mut self) -> Self {
        self.ignore_cancelled = true;
        self
    }
}

/// Opaque tag grouping subscriptions for bulk removal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Namespace(Arc<str>);

impl From<&str> for Namespace {
    fn from(tag: &str) -> Self {
        Namespace(Arc::from(tag))
    }
}

impl From<String> for Namespace {
    fn from(tag: String) -> Self {
        Namespace(Arc::from(tag.as_str()))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

/// Type-erased invocation adapter: widens the published event to the
/// handler's declared type and performs the call.
pub(crate) type Adapter = Arc<dyn Fn(&dyn Event) + Send + Sync>;

/// Type-erased owner handle, kept for identity-based bulk removal.
pub(crate) type Owner = Arc<dyn Any + Send + Sync>;

/// Wrap a typed handler into an [`Adapter`].
///
/// The widening step goes through [`Event::upcast`], so the same adapter
/// serves exact subscriptions (self-view) and hierarchical ones (ancestor
/// view of a subtype event). A failed widening means the event's declared
/// hierarchy and its `upcast` disagree; the handler is skipped with a log.
pub(crate) fn adapter_for<E, F>(handler: F) -> Adapter
where
    E: Event,
    F: Fn(&E) + Send + Sync + 'static,
{
    Arc::new(move |event: &dyn Event| {
        match event
            .upcast(TypeId::of::<E>())
            .and_then(|view| view.downcast_ref::<E>())
        {
            Some(typed) => handler(typed),
            None => warn!(
                "published event does not widen to {}; handler skipped",
                std::any::type_name::<E>()
            ),
        }
    })
}

/// Everything a binding knows about a handler before the bus assigns the
/// namespace and registration sequence.
pub(crate) struct Draft {
    pub(crate) param: EventType,
    pub(crate) opts: Subscribe,
    pub(crate) owner: Option<Owner>,
    pub(crate) owner_type: TypeId,
    pub(crate) owner_name: &'static str,
    pub(crate) label: &'static str,
    pub(crate) adapter: Adapter,
}

/// Immutable record of one registered handler.
///
/// Equality is identity-based: registering the same handler twice yields two
/// distinct descriptors, and only the returned descriptor unregisters it.
pub struct Subscription {
    id: Uuid,
    namespace: Namespace,
    owner: Option<Owner>,
    owner_type: TypeId,
    owner_name: &'static str,
    label: &'static str,
    param: EventType,
    exact_event: bool,
    order: PostOrder,
    ignore_cancelled: bool,
    seq: u64,
    adapter: Adapter,
}

impl Subscription {
    pub(crate) fn new(draft: Draft, namespace: Namespace, seq: u64) -> Self {
        Subscription {
            id: Uuid::new_v4(),
            namespace,
            owner: draft.owner,
            owner_type: draft.owner_type,
            owner_name: draft.owner_name,
            label: draft.label,
            param: draft.param,
            exact_event: draft.opts.exact_event,
            order: draft.opts.order,
            ignore_cancelled: draft.opts.ignore_cancelled,
            seq,
            adapter: draft.adapter,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn order(&self) -> PostOrder {
        self.order
    }

    pub fn ignore_cancelled(&self) -> bool {
        self.ignore_cancelled
    }

    pub fn exact_event(&self) -> bool {
        self.exact_event
    }

    /// The event type the handler was declared for.
    pub fn param(&self) -> EventType {
        self.param
    }

    /// Handler identity for log lines.
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub(crate) fn owner_type(&self) -> TypeId {
        self.owner_type
    }

    pub(crate) fn owner_name(&self) -> &'static str {
        self.owner_name
    }

    /// Data pointer of the owner, for identity-based removal.
    pub(crate) fn owner_ptr(&self) -> Option<*const ()> {
        self.owner.as_ref().map(|o| Arc::as_ptr(o) as *const ())
    }

    /// Whether this subscription covers concrete event type `concrete`,
    /// given the memoized ancestor set of that type.
    pub(crate) fn matches(&self, concrete: TypeId, ancestors: &[EventType]) -> bool {
        if self.exact_event {
            self.param.id() == concrete
        } else {
            ancestors.iter().any(|ty| ty.id() == self.param.id())
        }
    }

    pub(crate) fn invoke(&self, event: &dyn Event) {
        (self.adapter)(event);
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Subscription {}

impl PartialOrd for Subscription {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Subscription {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.order, self.seq).cmp(&(other.order, other.seq))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("owner", &self.owner_name)
            .field("handler", &self.label)
            .field("event", &self.param)
            .field("order", &self.order)
            .field("exact_event", &self.exact_event)
            .field("ignore_cancelled", &self.ignore_cancelled)
            .finish()
    }
}
