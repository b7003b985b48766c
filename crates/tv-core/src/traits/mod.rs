//! Collaborator trait definitions

mod engine;
mod notify;
mod observer;
mod store;

pub use engine::{Engine, LogStream};
pub use notify::Notifier;
pub use observer::Observer;
pub use store::ProfileStore;
