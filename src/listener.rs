//! Handler discovery.
//!
//! A subscriber type implements [`Listener`] and enumerates its handlers into
//! a [`Bindings`] collector. The instance form (`EventBus::register`) accepts
//! both instance handlers and receiver-less handlers; the type form
//! (`EventBus::register_type`) accepts only receiver-less handlers and skips
//! the rest with a log, mirroring static-only registration.

use std::any::TypeId;
use std::sync::Arc;

use log::warn;

use crate::event::{Event, EventType};
use crate::subscription::{Draft, Owner, Subscribe, adapter_for};

/// A type that can enumerate handler bindings for itself.
///
/// ```ignore
/// struct PlayerTracker { joins: AtomicUsize }
///
/// impl Listener for PlayerTracker {
///     fn bindings(b: &mut Bindings<Self>) {
///         b.on(Subscribe::default(), Self::on_join);
///         b.on(Subscribe::order(PostOrder::Last), Self::on_quit);
///     }
/// }
/// ```
pub trait Listener: Send + Sync + 'static {
    fn bindings(b: &mut Bindings<Self>)
    where
        Self: Sized;
}

/// Collector the bus hands to [`Listener::bindings`].
pub struct Bindings<L> {
    owner: Option<Arc<L>>,
    drafts: Vec<Draft>,
}

impl<L: Listener> Bindings<L> {
    pub(crate) fn for_instance(owner: Arc<L>) -> Self {
        Bindings {
            owner: Some(owner),
            drafts: Vec::new(),
        }
    }

    pub(crate) fn for_type() -> Self {
        Bindings {
            owner: None,
            drafts: Vec::new(),
        }
    }

    pub(crate) fn into_drafts(self) -> Vec<Draft> {
        self.drafts
    }

    /// Bind an instance handler (a method of `L`).
    ///
    /// Skipped with a log when `L` was registered as a type, since there is
    /// no instance to receive the call.
    pub fn on<E, H>(&mut self, opts: Subscribe, handler: H)
    where
        E: Event,
        H: Fn(&L, &E) + Send + Sync + 'static,
    {
        let Some(owner) = self.owner.clone() else {
            warn!(
                "skipped instance handler {} for {}: {} was registered as a type",
                std::any::type_name::<H>(),
                std::any::type_name::<E>(),
                std::any::type_name::<L>()
            );
            return;
        };
        let anchor: Owner = owner.clone();
        self.drafts.push(Draft {
            param: EventType::of::<E>(),
            opts,
            owner: Some(anchor),
            owner_type: TypeId::of::<L>(),
            owner_name: std::any::type_name::<L>(),
            label: std::any::type_name::<H>(),
            adapter: adapter_for::<E, _>(move |event| handler(&owner, event)),
        });
    }

    /// Bind a receiver-less handler (a free function or closure).
    pub fn on_fn<E, H>(&mut self, opts: Subscribe, handler: H)
    where
        E: Event,
        H: Fn(&E) + Send + Sync + 'static,
    {
        self.drafts.push(Draft {
            param: EventType::of::<E>(),
            opts,
            owner: None,
            owner_type: TypeId::of::<L>(),
            owner_name: std::any::type_name::<L>(),
            label: std::any::type_name::<H>(),
            adapter: adapter_for::<E, _>(handler),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tick;
    impl Event for Tick {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Counter {
        ticks: AtomicUsize,
    }

    impl Counter {
        fn on_tick(&self, _event: &Tick) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Listener for Counter {
        fn bindings(b: &mut Bindings<Self>) {
            b.on(Subscribe::default(), Self::on_tick);
            b.on_fn(Subscribe::default(), |_event: &Tick| {});
        }
    }

    #[test]
    fn instance_form_collects_all_bindings() {
        let counter = Arc::new(Counter {
            ticks: AtomicUsize::new(0),
        });
        let mut b = Bindings::for_instance(counter.clone());
        Counter::bindings(&mut b);
        let drafts = b.into_drafts();
        assert_eq!(drafts.len(), 2);
        assert!(drafts[0].owner.is_some());
        assert!(drafts[1].owner.is_none());

        drafts[0].adapter.as_ref()(&Tick);
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn type_form_drops_instance_bindings() {
        let mut b = Bindings::<Counter>::for_type();
        Counter::bindings(&mut b);
        let drafts = b.into_drafts();
        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].owner.is_none());
        assert_eq!(drafts[0].owner_type, TypeId::of::<Counter>());
    }
}
