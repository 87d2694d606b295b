//! Compiled per-event-type dispatch routines.
//!
//! A [`Dispatcher`] is the baked form of one sorted handler list: a boxed
//! slice of invocation adapters with the cancellation gates precomputed at
//! compile time, so the publish path is one map probe plus an O(k) walk with
//! no allocation.
//!
//! Gating: a *gated run* is a maximal contiguous block of subscribers with
//! `ignore_cancelled` set. The event's cancelled flag is sampled once at the
//! start of each run; a cancelled event skips the whole run, and subscribers
//! inside a run never observe a cancellation produced later in the same run.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error};

use crate::event::{Cancellable, Event, EventType};
use crate::subscription::Subscription;

/// The published dispatch surface: an immutable snapshot replaced wholesale
/// on every rebuild. Publishers clone the `Arc` and never see a torn view.
#[derive(Clone, Default)]
pub(crate) struct DispatchTable {
    /// One compiled dispatcher per event type with at least one subscriber.
    pub(crate) dispatchers: HashMap<TypeId, Arc<Dispatcher>>,
    /// Event types the bus has seen that currently have no subscribers, so
    /// repeat publishes of them stay on the fast path.
    pub(crate) quiet: HashSet<TypeId>,
}

struct Call {
    sub: Arc<Subscription>,
    /// True when this call opens a gated run.
    gate: bool,
}

pub(crate) struct Dispatcher {
    event: EventType,
    calls: Box<[Call]>,
}

impl Dispatcher {
    /// Bake the sorted subscription list into an invocation chain.
    pub(crate) fn compile(event: EventType, subs: &[Arc<Subscription>]) -> Arc<Dispatcher> {
        let started = Instant::now();
        let mut calls = Vec::with_capacity(subs.len());
        let mut in_run = false;
        for sub in subs {
            let ignores = sub.ignore_cancelled();
            calls.push(Call {
                sub: sub.clone(),
                gate: ignores && !in_run,
            });
            in_run = ignores;
        }
        let dispatcher = Arc::new(Dispatcher {
            event,
            calls: calls.into_boxed_slice(),
        });
        debug!(
            "compiled dispatcher for {}: {} handler(s) in {:?}",
            event.name(),
            dispatcher.calls.len(),
            started.elapsed()
        );
        dispatcher
    }

    /// Invoke every subscriber with per-subscriber isolation: a panicking
    /// handler is logged and the chain continues, as does the hook.
    pub(crate) fn run_safe(&self, event: &dyn Event) {
        let mut skip_run = false;
        for call in &self.calls {
            if call.sub.ignore_cancelled() {
                if call.gate {
                    skip_run = cancelled(event);
                }
                if skip_run {
                    continue;
                }
            }
            let sub = &call.sub;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sub.invoke(event))) {
                error!(
                    "handler {} of {} panicked handling {}: {}",
                    sub.label(),
                    sub.owner_name(),
                    self.event.name(),
                    panic_text(&*payload)
                );
            }
        }
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| event.post_dispatch())) {
            error!(
                "post-dispatch hook of {} panicked: {}",
                self.event.name(),
                panic_text(&*payload)
            );
        }
    }

    /// Invoke without isolation: the first panic unwinds out, skipping the
    /// remaining subscribers and the post-dispatch hook. The bus catches it
    /// once at the outer boundary.
    pub(crate) fn run_unsafe(&self, event: &dyn Event) {
        let mut skip_run = false;
        for call in &self.calls {
            if call.sub.ignore_cancelled() {
                if call.gate {
                    skip_run = cancelled(event);
                }
                if skip_run {
                    continue;
                }
            }
            call.sub.invoke(event);
        }
        event.post_dispatch();
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self) -> usize {
        self.calls.len()
    }
}

fn cancelled(event: &dyn Event) -> bool {
    event.cancellation().is_some_and(|view| view.is_cancelled())
}

/// Best-effort text of a panic payload for log lines.
pub(crate) fn panic_text(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
