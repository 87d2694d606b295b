//! The bus: registration, removal, baking and the dispatch surface.
//!
//! Concurrency model: one mutex serializes every structural mutation
//! (register, unregister, bake) including the publication of a fresh
//! [`DispatchTable`]. Publishers never take that mutex — they clone the
//! current table `Arc` under a momentary read lock and walk a compiled
//! dispatcher. Handlers run with no bus lock held, so they may freely
//! re-enter the bus (publish, register, unregister).

use std::any::TypeId;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, error, warn};

use crate::dispatcher::{DispatchTable, Dispatcher, panic_text};
use crate::event::{AsyncEvent, Event, EventType};
use crate::hierarchy::TypeGraph;
use crate::listener::{Bindings, Listener};
use crate::registry::Registry;
use crate::subscription::{Draft, Namespace, Subscribe, Subscription};

/// Typed in-process publish/subscribe bus.
///
/// ```ignore
/// let bus = EventBus::new();
/// bus.subscribe("core", |event: &FrameLoaded| {
///     println!("frame {} ready", event.frame);
/// });
/// bus.dispatch(&FrameLoaded { frame: 42 });
/// ```
pub struct EventBus {
    registry: Mutex<Registry>,
    table: RwLock<Arc<DispatchTable>>,
    graph: TypeGraph,
    seq: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            registry: Mutex::new(Registry::new()),
            table: RwLock::new(Arc::new(DispatchTable::default())),
            graph: TypeGraph::new(),
            seq: AtomicU64::new(0),
        }
    }

    // ========== Registration ==========

    /// Register every binding of a listener instance.
    ///
    /// Returns the created descriptors; keep them to unregister handlers
    /// individually, or use the bulk removal operations.
    pub fn register<L: Listener>(
        &self,
        namespace: impl Into<Namespace>,
        listener: &Arc<L>,
    ) -> Vec<Arc<Subscription>> {
        let mut bindings = Bindings::for_instance(listener.clone());
        L::bindings(&mut bindings);
        self.commit(namespace.into(), bindings.into_drafts())
    }

    /// Register only the receiver-less bindings of `L`; instance bindings
    /// are logged and skipped.
    pub fn register_type<L: Listener>(
        &self,
        namespace: impl Into<Namespace>,
    ) -> Vec<Arc<Subscription>> {
        let mut bindings = Bindings::<L>::for_type();
        L::bindings(&mut bindings);
        self.commit(namespace.into(), bindings.into_drafts())
    }

    /// Register a single callback for event type `E` with default options
    /// (order `Normal`, hierarchical, not ignoring cancelled events).
    pub fn subscribe<E, H>(&self, namespace: impl Into<Namespace>, handler: H) -> Arc<Subscription>
    where
        E: Event,
        H: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe_with(namespace, Subscribe::default(), handler)
    }

    /// Register a single callback for event type `E` with explicit options.
    pub fn subscribe_with<E, H>(
        &self,
        namespace: impl Into<Namespace>,
        opts: Subscribe,
        handler: H,
    ) -> Arc<Subscription>
    where
        E: Event,
        H: Fn(&E) + Send + Sync + 'static,
    {
        let draft = Draft {
            param: EventType::of::<E>(),
            opts,
            owner: None,
            owner_type: TypeId::of::<H>(),
            owner_name: std::any::type_name::<H>(),
            label: std::any::type_name::<H>(),
            adapter: crate::subscription::adapter_for::<E, _>(handler),
        };
        let mut subs = self.commit(namespace.into(), vec![draft]);
        subs.remove(0)
    }

    // ========== Removal ==========

    /// Remove one descriptor. Returns whether it was still registered.
    pub fn unregister(&self, sub: &Subscription) -> bool {
        let id = sub.id();
        self.remove_where(move |s| s.id() == id) > 0
    }

    /// Remove every subscription owned by this listener instance.
    pub fn unregister_owner<L: Listener>(&self, listener: &Arc<L>) -> usize {
        let target = Arc::as_ptr(listener) as *const ();
        self.remove_where(move |s| s.owner_ptr() == Some(target))
    }

    /// Remove every subscription declared by listener type `L`, including
    /// its receiver-less bindings.
    pub fn unregister_type<L: Listener>(&self) -> usize {
        let target = TypeId::of::<L>();
        self.remove_where(move |s| s.owner_type() == target)
    }

    /// Remove every subscription registered under this namespace.
    pub fn unregister_namespace(&self, namespace: impl Into<Namespace>) -> usize {
        let target = namespace.into();
        self.remove_where(move |s| *s.namespace() == target)
    }

    /// Drop every subscription and every compiled dispatcher.
    pub fn clear(&self) {
        let dropped = self.remove_where(|_| true);
        if dropped > 0 {
            debug!("cleared {dropped} subscription(s)");
        }
    }

    /// Rebuild every dispatcher from the current index.
    pub fn bake(&self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let known = registry.known_types();
        for ty in &known {
            registry.refresh(*ty, &self.graph);
        }
        self.republish(&registry, &known);
        debug!("baked {} event type(s)", known.len());
    }

    // ========== Dispatch ==========

    /// Publish an event to all matching subscribers in order, isolating each
    /// subscriber and the post-dispatch hook from panics. Never unwinds.
    pub fn dispatch<E: Event>(&self, event: &E) {
        if let Some(dispatcher) = self.dispatcher_for::<E>() {
            dispatcher.run_safe(event);
        }
    }

    /// Publish without per-subscriber isolation: the first panicking handler
    /// aborts the remaining chain and the hook. The panic is caught here at
    /// the outer boundary and logged once.
    pub fn unsafe_dispatch<E: Event>(&self, event: &E) {
        if let Some(dispatcher) = self.dispatcher_for::<E>() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| dispatcher.run_unsafe(event))) {
                error!(
                    "unsafe dispatch of {} aborted: {}",
                    std::any::type_name::<E>(),
                    panic_text(&*payload)
                );
            }
        }
    }

    /// Dispatch synchronously, then hand back the event's completion handle.
    /// The handle is resolved by the handlers, never by the bus.
    pub fn dispatch_async<E: AsyncEvent>(&self, event: &E) -> E::Done {
        self.dispatch(event);
        event.done_future()
    }

    /// [`EventBus::unsafe_dispatch`] followed by the completion handle.
    pub fn unsafe_dispatch_async<E: AsyncEvent>(&self, event: &E) -> E::Done {
        self.unsafe_dispatch(event);
        event.done_future()
    }

    // ========== Introspection ==========

    /// Whether a publish of `E` right now would invoke at least one handler.
    pub fn has_subscribers<E: Event>(&self) -> bool {
        let id = TypeId::of::<E>();
        {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            if table.dispatchers.contains_key(&id) {
                return true;
            }
            if table.quiet.contains(&id) {
                return false;
            }
        }
        let ancestors = self.graph.ancestors(EventType::of::<E>());
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry
            .subscriptions()
            .iter()
            .any(|sub| sub.matches(id, &ancestors))
    }

    pub fn subscription_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscription_count()
    }

    // ========== Internals ==========

    fn commit(&self, namespace: Namespace, drafts: Vec<Draft>) -> Vec<Arc<Subscription>> {
        if drafts.is_empty() {
            warn!("registration under '{namespace}' produced no handlers");
            return Vec::new();
        }
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let subs: Vec<Arc<Subscription>> = drafts
            .into_iter()
            .map(|draft| {
                Arc::new(Subscription::new(
                    draft,
                    namespace.clone(),
                    self.seq.fetch_add(1, Ordering::Relaxed),
                ))
            })
            .collect();
        let affected = registry.insert(&subs, &self.graph);
        self.republish(&registry, &affected);
        debug!(
            "registered {} handler(s) under '{}', {} event type(s) rebuilt",
            subs.len(),
            namespace,
            affected.len()
        );
        subs
    }

    fn remove_where(&self, pred: impl Fn(&Subscription) -> bool) -> usize {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let (removed, affected) = registry.remove_if(pred, &self.graph);
        if removed.is_empty() {
            return 0;
        }
        self.republish(&registry, &affected);
        debug!(
            "unregistered {} handler(s), {} event type(s) rebuilt",
            removed.len(),
            affected.len()
        );
        removed.len()
    }

    /// Swap in a fresh dispatch table covering the affected event types.
    /// Caller holds the registry mutex.
    fn republish(&self, registry: &Registry, affected: &[EventType]) {
        if affected.is_empty() {
            return;
        }
        let snapshot = self.table.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut table = (*snapshot).clone();
        for ty in affected {
            match registry.list(ty.id()) {
                Some(list) => {
                    table.quiet.remove(&ty.id());
                    table
                        .dispatchers
                        .insert(ty.id(), Dispatcher::compile(*ty, list));
                }
                None => {
                    table.dispatchers.remove(&ty.id());
                    table.quiet.insert(ty.id());
                }
            }
        }
        *self.table.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(table);
    }

    /// Dispatcher lookup. The fast path is one read-lock probe; the first
    /// publish of an unseen event type activates it under the registry mutex
    /// and republishes the table.
    fn dispatcher_for<E: Event>(&self) -> Option<Arc<Dispatcher>> {
        let id = TypeId::of::<E>();
        {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            if let Some(dispatcher) = table.dispatchers.get(&id) {
                return Some(dispatcher.clone());
            }
            if table.quiet.contains(&id) {
                return None;
            }
        }

        let ty = EventType::of::<E>();
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // A racing publisher of the same type may have activated it already.
        {
            let table = self.table.read().unwrap_or_else(|e| e.into_inner());
            if let Some(dispatcher) = table.dispatchers.get(&id) {
                return Some(dispatcher.clone());
            }
            if table.quiet.contains(&id) {
                return None;
            }
        }
        registry.activate(ty, &self.graph);
        self.republish(&registry, &[ty]);
        drop(registry);

        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.dispatchers.get(&id).cloned()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("EventBus")
            .field("dispatchers", &table.dispatchers.len())
            .field("quiet_types", &table.quiet.len())
            .finish()
    }
}
