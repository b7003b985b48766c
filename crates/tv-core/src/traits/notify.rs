//! Notification surface trait

/// Status surface shown while the engine runs
///
/// Calls must not block; they are made from event delivery paths.
pub trait Notifier: Send + Sync {
    /// Show the persistent status notification
    fn show(&self);

    /// Remove the status notification
    fn cancel(&self);

    /// Update displayed throughput (bytes per second)
    fn set_speed(&self, up: u64, down: u64);

    /// Update the displayed profile name
    fn set_profile(&self, name: &str);

    /// Mark whether a tunnel device is attached
    fn set_vpn_active(&self, active: bool);
}
