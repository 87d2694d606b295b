//! Registration-side state: the live subscription list and the per-event-type
//! index it projects.
//!
//! The registry is always driven under the bus mutex. Event types become
//! *known* the first time they are dispatched or named by a registration;
//! every mutation re-derives the sorted handler list of each affected known
//! type, so a list either holds exactly the live matching descriptors in
//! `(order, seq)` order or does not exist at all.

use std::any::TypeId;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::event::EventType;
use crate::hierarchy::TypeGraph;
use crate::subscription::Subscription;

pub(crate) struct Registry {
    /// All live descriptors, in registration order.
    subscriptions: Vec<Arc<Subscription>>,
    /// Sorted matching descriptors per known event type. No empty lists.
    by_event: IndexMap<TypeId, Vec<Arc<Subscription>>>,
    /// Every concrete event type the bus has seen. Grows monotonically.
    known: IndexMap<TypeId, EventType>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry {
            subscriptions: Vec::new(),
            by_event: IndexMap::new(),
            known: IndexMap::new(),
        }
    }

    /// Make `ty` a known event type and derive its handler list.
    pub(crate) fn activate(&mut self, ty: EventType, graph: &TypeGraph) {
        if self.known.contains_key(&ty.id()) {
            return;
        }
        self.known.insert(ty.id(), ty);
        self.refresh(ty, graph);
    }

    /// Append descriptors and rebuild the lists of every known type they
    /// cover. Returns the affected types.
    pub(crate) fn insert(
        &mut self,
        subs: &[Arc<Subscription>],
        graph: &TypeGraph,
    ) -> Vec<EventType> {
        for sub in subs {
            let param = sub.param();
            self.known.entry(param.id()).or_insert(param);
        }
        self.subscriptions.extend(subs.iter().cloned());

        let affected: Vec<EventType> = self
            .known
            .values()
            .copied()
            .filter(|ty| {
                let ancestors = graph.ancestors(*ty);
                subs.iter().any(|sub| sub.matches(ty.id(), &ancestors))
            })
            .collect();
        for ty in &affected {
            self.refresh(*ty, graph);
        }
        affected
    }

    /// Drop every descriptor matching `pred` and rebuild the lists it
    /// appeared in. Returns the removed descriptors and the affected types.
    pub(crate) fn remove_if(
        &mut self,
        pred: impl Fn(&Subscription) -> bool,
        graph: &TypeGraph,
    ) -> (Vec<Arc<Subscription>>, Vec<EventType>) {
        let mut removed = Vec::new();
        self.subscriptions.retain(|sub| {
            if pred(sub) {
                removed.push(sub.clone());
                false
            } else {
                true
            }
        });
        if removed.is_empty() {
            return (removed, Vec::new());
        }

        let affected: Vec<EventType> = self
            .known
            .values()
            .copied()
            .filter(|ty| {
                let ancestors = graph.ancestors(*ty);
                removed.iter().any(|sub| sub.matches(ty.id(), &ancestors))
            })
            .collect();
        for ty in &affected {
            self.refresh(*ty, graph);
        }
        (removed, affected)
    }

    /// Re-derive the sorted handler list of one known type from scratch.
    pub(crate) fn refresh(&mut self, ty: EventType, graph: &TypeGraph) {
        let ancestors = graph.ancestors(ty);
        let mut list: Vec<Arc<Subscription>> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.matches(ty.id(), &ancestors))
            .cloned()
            .collect();
        list.sort();
        if list.is_empty() {
            self.by_event.shift_remove(&ty.id());
        } else {
            self.by_event.insert(ty.id(), list);
        }
    }

    pub(crate) fn list(&self, ty: TypeId) -> Option<&[Arc<Subscription>]> {
        self.by_event.get(&ty).map(Vec::as_slice)
    }

    pub(crate) fn known_types(&self) -> Vec<EventType> {
        self.known.values().copied().collect()
    }

    pub(crate) fn subscriptions(&self) -> &[Arc<Subscription>] {
        &self.subscriptions
    }

    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::subscription::{Draft, Namespace, PostOrder, Subscribe, adapter_for};
    use std::any::Any;

    struct Base;
    impl Event for Base {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Child;
    impl Event for Child {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn parents() -> Vec<EventType> {
            vec![EventType::of::<Base>()]
        }
    }

    fn sub_for<E: Event>(opts: Subscribe, seq: u64) -> Arc<Subscription> {
        let draft = Draft {
            param: EventType::of::<E>(),
            opts,
            owner: None,
            owner_type: TypeId::of::<()>(),
            owner_name: "test",
            label: "test-handler",
            adapter: adapter_for::<E, _>(|_| {}),
        };
        Arc::new(Subscription::new(draft, Namespace::from("test"), seq))
    }

    #[test]
    fn insert_projects_into_every_covered_type() {
        let graph = TypeGraph::new();
        let mut reg = Registry::new();
        reg.activate(EventType::of::<Child>(), &graph);

        let sub = sub_for::<Base>(Subscribe::default(), 0);
        let affected = reg.insert(std::slice::from_ref(&sub), &graph);

        // Base was self-registered, Child was already known and is covered.
        assert_eq!(affected.len(), 2);
        assert_eq!(reg.list(TypeId::of::<Base>()).unwrap().len(), 1);
        assert_eq!(reg.list(TypeId::of::<Child>()).unwrap().len(), 1);
    }

    #[test]
    fn exact_subscriptions_do_not_fan_out() {
        let graph = TypeGraph::new();
        let mut reg = Registry::new();
        reg.activate(EventType::of::<Child>(), &graph);

        let sub = sub_for::<Base>(Subscribe::default().exact(), 0);
        reg.insert(std::slice::from_ref(&sub), &graph);

        assert!(reg.list(TypeId::of::<Base>()).is_some());
        assert!(reg.list(TypeId::of::<Child>()).is_none());
    }

    #[test]
    fn lists_stay_sorted_and_empty_lists_disappear() {
        let graph = TypeGraph::new();
        let mut reg = Registry::new();

        let late = sub_for::<Base>(Subscribe::order(PostOrder::Late), 0);
        let first = sub_for::<Base>(Subscribe::order(PostOrder::First), 1);
        reg.insert(&[late.clone(), first.clone()], &graph);

        let listed = reg.list(TypeId::of::<Base>()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id(), first.id());
        assert_eq!(listed[1].id(), late.id());

        let (removed, affected) = reg.remove_if(|_| true, &graph);
        assert_eq!(removed.len(), 2);
        assert_eq!(affected.len(), 1);
        assert!(reg.list(TypeId::of::<Base>()).is_none());
        assert_eq!(reg.subscription_count(), 0);
    }

    #[test]
    fn removal_keeps_the_type_known() {
        let graph = TypeGraph::new();
        let mut reg = Registry::new();

        let sub = sub_for::<Base>(Subscribe::default(), 0);
        reg.insert(std::slice::from_ref(&sub), &graph);
        reg.remove_if(|s| s.id() == sub.id(), &graph);
        assert!(reg.list(TypeId::of::<Base>()).is_none());

        // A later registration must still cover the previously seen type.
        let again = sub_for::<Base>(Subscribe::default(), 1);
        let affected = reg.insert(std::slice::from_ref(&again), &graph);
        assert_eq!(affected.len(), 1);
        assert_eq!(reg.list(TypeId::of::<Base>()).unwrap().len(), 1);
    }
}
