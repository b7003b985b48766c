//! Status notification surface
//!
//! The daemon has no graphical shell, so its notifier reports status changes
//! through `tracing`. [`NotificationObserver`] is the default subscriber that
//! feeds the notifier from the event stream.

use std::sync::{Arc, Mutex};

use tv_core::traits::{Notifier, Observer};
use tv_core::{LogLevel, TelemetryEvent};

/// What the status surface currently shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationStatus {
    pub visible: bool,
    pub profile: Option<String>,
    pub vpn_active: bool,
    pub up: u64,
    pub down: u64,
}

/// Notifier that logs status changes
#[derive(Default)]
pub struct TracingNotifier {
    status: Mutex<NotificationStatus>,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status
    pub fn status(&self) -> NotificationStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn update(&self, f: impl FnOnce(&mut NotificationStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut status);
    }
}

impl Notifier for TracingNotifier {
    fn show(&self) {
        self.update(|s| s.visible = true);
        tracing::info!("Engine running");
    }

    fn cancel(&self) {
        self.update(|s| {
            s.visible = false;
            s.up = 0;
            s.down = 0;
        });
        tracing::info!("Engine stopped");
    }

    fn set_speed(&self, up: u64, down: u64) {
        self.update(|s| {
            s.up = up;
            s.down = down;
        });
        tracing::trace!(up, down, "Throughput");
    }

    fn set_profile(&self, name: &str) {
        self.update(|s| s.profile = Some(name.to_string()));
        tracing::info!(profile = %name, "Active profile");
    }

    fn set_vpn_active(&self, active: bool) {
        self.update(|s| s.vpn_active = active);
        tracing::info!(active, "Tunnel device");
    }
}

/// Default subscriber feeding the notifier
///
/// Speed readings go to the status surface; engine log lines are mirrored
/// into the daemon log under the `engine` target.
pub struct NotificationObserver {
    notifier: Arc<dyn Notifier>,
}

impl NotificationObserver {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl Observer for NotificationObserver {
    fn on_event(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::Speed { up, down } => self.notifier.set_speed(*up, *down),
            TelemetryEvent::Log(line) => match line.level {
                LogLevel::Debug => tracing::debug!(target: "engine", "{}", line.payload),
                LogLevel::Info => tracing::info!(target: "engine", "{}", line.payload),
                LogLevel::Warning => tracing::warn!(target: "engine", "{}", line.payload),
                LogLevel::Error => tracing::error!(target: "engine", "{}", line.payload),
                LogLevel::Silent => {}
            },
            _ => {}
        }
    }
}
