//! Observer registry
//!
//! Maps observer ids to their observer and interest set. Dispatch runs under
//! the registry lock, so a single observer never sees two events at once and
//! receives them in dispatch order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tv_core::traits::Observer;
use tv_core::{KindSet, ObserverId, TelemetryEvent};

struct Registration {
    observer: Arc<dyn Observer>,
    kinds: KindSet,
}

/// Registered observers and their interests
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Mutex<HashMap<ObserverId, Registration>>,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ObserverId, Registration>> {
        // A panicking observer must not take event delivery down with it
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver `event` to every observer interested in its kind
    pub fn dispatch(&self, event: &TelemetryEvent) {
        let kind = event.kind();
        let entries = self.entries();
        for registration in entries.values() {
            if registration.kinds.contains(kind) {
                registration.observer.on_event(event);
            }
        }
    }

    /// Deliver `event` only if `live` still holds once the lock is taken
    pub(crate) fn dispatch_if(&self, event: &TelemetryEvent, live: impl FnOnce() -> bool) {
        let kind = event.kind();
        let entries = self.entries();
        if !live() {
            return;
        }
        for registration in entries.values() {
            if registration.kinds.contains(kind) {
                registration.observer.on_event(event);
            }
        }
    }

    /// Replace (`Some`) or remove (`None`) the registration of `id`
    ///
    /// `apply` runs with the interest union before and after the change,
    /// still under the registry lock, so concurrent updates apply their
    /// deltas in the same order they changed the registry.
    pub(crate) fn update<R>(
        &self,
        id: ObserverId,
        registration: Option<(Arc<dyn Observer>, KindSet)>,
        apply: impl FnOnce(KindSet, KindSet) -> R,
    ) -> R {
        let mut entries = self.entries();
        let before = union_of(&entries);

        match registration {
            Some((observer, kinds)) => {
                entries.insert(id, Registration { observer, kinds });
            }
            None => {
                entries.remove(&id);
            }
        }

        let after = union_of(&entries);
        apply(before, after)
    }

    /// Run `f` with the current interest union, under the registry lock
    pub(crate) fn with_interests<R>(&self, f: impl FnOnce(KindSet) -> R) -> R {
        let entries = self.entries();
        f(union_of(&entries))
    }

    /// Union of every observer's interests
    pub fn interests(&self) -> KindSet {
        union_of(&self.entries())
    }

    /// Interest set of one observer
    pub fn kinds_of(&self, id: ObserverId) -> Option<KindSet> {
        self.entries().get(&id).map(|r| r.kinds)
    }

    /// Check if an observer is registered
    pub fn contains(&self, id: ObserverId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if no observers are registered
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn union_of(entries: &HashMap<ObserverId, Registration>) -> KindSet {
    entries
        .values()
        .fold(KindSet::empty(), |acc, r| acc.union(r.kinds))
}
