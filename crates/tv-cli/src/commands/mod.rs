//! CLI command implementations

mod lifecycle;
mod profiles;
mod proxies;
mod status;
mod watch;

pub use lifecycle::{foreground_command, reload_command, start_command, stop_command};
pub use profiles::{profile_add, profile_list, profile_remove, profile_use};
pub use proxies::{proxies_command, select_command};
pub use status::status_command;
pub use watch::watch_command;
