//! Memoized resolver of event type ancestry.
//!
//! `ancestors(T)` is `T` plus every transitive supertype `T` declares through
//! [`Event::parents`]. The result is computed once per type and cached for
//! the lifetime of the bus; the cache only ever grows.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::event::EventType;

pub(crate) struct TypeGraph {
    cache: RwLock<HashMap<TypeId, Arc<[EventType]>>>,
}

impl TypeGraph {
    pub(crate) fn new() -> Self {
        TypeGraph {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// `ty` plus every transitive supertype, deduplicated, self first.
    ///
    /// Two threads resolving the same type concurrently both compute the set
    /// and race to insert; the value is identical either way.
    pub(crate) fn ancestors(&self, ty: EventType) -> Arc<[EventType]> {
        if let Some(found) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ty.id())
        {
            return found.clone();
        }

        // Breadth-first over declared parents; dedup keeps diamonds finite.
        let mut seen: Vec<EventType> = vec![ty];
        let mut cursor = 0;
        while cursor < seen.len() {
            for parent in seen[cursor].parents() {
                if !seen.iter().any(|known| known.id() == parent.id()) {
                    seen.push(parent);
                }
            }
            cursor += 1;
        }

        let resolved: Arc<[EventType]> = seen.into();
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ty.id(), resolved.clone());
        resolved
    }
}
