//! Observer trait

use tokio::sync::mpsc;

use crate::event::TelemetryEvent;

/// Receiver of telemetry events
///
/// `on_event` is called while the registry lock is held so that every
/// observer sees events in emission order. Implementations must return
/// quickly and must not call back into the registry.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &TelemetryEvent);
}

/// Channel-backed observer; events are dropped once the receiver is gone
impl Observer for mpsc::UnboundedSender<TelemetryEvent> {
    fn on_event(&self, event: &TelemetryEvent) {
        let _ = self.send(event.clone());
    }
}
