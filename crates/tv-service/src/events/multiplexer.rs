//! Event multiplexer
//!
//! Ties observer registration to the pull loops: registering the first
//! observer interested in a pulled kind starts its loop, and removing the last
//! one stops it.

use std::sync::Arc;

use tv_core::traits::Observer;
use tv_core::{EventKind, KindSet, ObserverId, TelemetryEvent};

use super::{ObserverRegistry, TelemetryPuller};

/// Observer registry plus reference-counted pull loops
pub struct EventMultiplexer {
    registry: Arc<ObserverRegistry>,
    puller: TelemetryPuller,
}

impl EventMultiplexer {
    /// Create a multiplexer over `registry`
    ///
    /// `puller` must dispatch into the same registry.
    pub fn new(registry: Arc<ObserverRegistry>, puller: TelemetryPuller) -> Self {
        Self { registry, puller }
    }

    /// Register `observer` under `id`, replacing any earlier interest set
    pub fn register_observer(&self, id: ObserverId, observer: Arc<dyn Observer>, kinds: KindSet) {
        tracing::debug!(observer = %id, kinds = ?kinds, "Registering observer");
        self.registry
            .update(id, Some((observer, kinds)), |before, after| {
                self.apply_delta(before, after)
            });
    }

    /// Remove the registration of `id`; returns whether it was registered
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        let known = self.registry.contains(id);
        if known {
            tracing::debug!(observer = %id, "Unregistering observer");
            self.registry
                .update(id, None, |before, after| self.apply_delta(before, after));
        }
        known
    }

    /// Deliver an event to interested observers
    pub fn dispatch(&self, event: &TelemetryEvent) {
        self.registry.dispatch(event);
    }

    /// Start a loop for every pulled kind some observer wants
    ///
    /// Called after the engine starts; kinds requested while it was stopped
    /// were recorded but not pulled.
    pub fn recast_event_requirement(&self) {
        self.registry.with_interests(|interests| {
            for kind in interests.iter().filter(|k| k.is_pulled()) {
                self.puller.start(kind);
            }
        });
    }

    /// Cancel every pull loop
    pub fn halt_pulls(&self) {
        self.puller.stop_all();
    }

    /// Union of every observer's interests
    pub fn interests(&self) -> KindSet {
        self.registry.interests()
    }

    /// Whether the loop for `kind` is running
    pub fn is_pulling(&self, kind: EventKind) -> bool {
        self.puller.is_active(kind)
    }

    /// Kinds with a running pull loop
    pub fn active_pulls(&self) -> KindSet {
        self.puller.active_kinds()
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.registry.len()
    }

    fn apply_delta(&self, before: KindSet, after: KindSet) {
        for kind in after.difference(before).iter().filter(|k| k.is_pulled()) {
            tracing::debug!("{} is now required", kind);
            self.puller.start(kind);
        }
        for kind in before.difference(after).iter().filter(|k| k.is_pulled()) {
            tracing::debug!("{} is no longer required", kind);
            self.puller.stop(kind);
        }
    }
}
