//! Profile persistence and reload

mod pipeline;
mod store;

pub use pipeline::{ReloadOutcome, ReloadPipeline, ReloadReason, ReloadWorker};
pub use store::FileProfileStore;
