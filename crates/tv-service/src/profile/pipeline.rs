//! Serialized profile reloads
//!
//! Reload requests are queued FIFO and executed one at a time by a single
//! worker task, so two reloads never overlap and the last request always
//! wins. Requests are not coalesced.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tv_core::traits::{Notifier, ProfileStore};
use tv_core::{EngineError, ErrorKind, TelemetryEvent};

use crate::events::EventMultiplexer;
use crate::supervisor::ProcessSupervisor;

/// How long shutdown waits for an in-flight reload
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What asked for a reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    /// The engine just started
    ProcessStarted,
    /// The stored profiles changed
    ProfileChanged,
    /// Explicit request
    Requested,
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadReason::ProcessStarted => write!(f, "engine started"),
            ReloadReason::ProfileChanged => write!(f, "profile changed"),
            ReloadReason::Requested => write!(f, "requested"),
        }
    }
}

/// Result of one reload run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The engine was not running
    Skipped,
    /// No profile is active; the engine was stopped
    NoActiveProfile,
    /// The active profile is loaded
    Loaded {
        profile: String,
        /// Groups dropped from the stored selection
        pruned: Vec<String>,
    },
    /// The profile could not be loaded; the engine was stopped
    Failed,
}

/// Performs a single reload against the collaborators
pub struct ReloadWorker {
    supervisor: Arc<ProcessSupervisor>,
    store: Arc<dyn ProfileStore>,
    notifier: Arc<dyn Notifier>,
    events: Arc<EventMultiplexer>,
}

impl ReloadWorker {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        store: Arc<dyn ProfileStore>,
        notifier: Arc<dyn Notifier>,
        events: Arc<EventMultiplexer>,
    ) -> Self {
        Self {
            supervisor,
            store,
            notifier,
            events,
        }
    }

    /// Load the active profile into the running engine
    pub async fn reload(&self) -> ReloadOutcome {
        if !self.supervisor.current_state().is_started() {
            tracing::debug!("Engine not running, skipping profile reload");
            return ReloadOutcome::Skipped;
        }

        let active = match self.store.query_active_profile().await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::info!("No active profile, stopping engine");
                self.supervisor.stop().await;
                return ReloadOutcome::NoActiveProfile;
            }
            Err(e) => return self.fail(format!("Failed to read active profile: {}", e)).await,
        };

        let selection = match self.store.query_profile_selected_proxies(active.id).await {
            Ok(selection) => selection,
            Err(e) => {
                return self
                    .fail(format!("Failed to read selections of {}: {}", active.name, e))
                    .await
            }
        };

        tracing::info!(profile = %active.name, path = ?active.cache_path, "Loading profile");

        match self.supervisor.load_profile(&active.cache_path, &selection).await {
            Ok(stale) => {
                if !stale.is_empty() {
                    tracing::info!(profile = %active.name, groups = ?stale, "Pruning stale proxy selections");
                    if let Err(e) = self.store.remove_proxy_selections(active.id, &stale).await {
                        tracing::warn!("Failed to prune stale selections: {}", e);
                    }
                }

                self.notifier.set_profile(&active.name);
                tracing::info!(profile = %active.name, "Profile loaded");

                ReloadOutcome::Loaded {
                    profile: active.name,
                    pruned: stale,
                }
            }
            // Stopped between the state check and the load
            Err(EngineError::NotRunning) => ReloadOutcome::Skipped,
            Err(e) => {
                self.fail(format!("Failed to load profile {}: {}", active.name, e))
                    .await
            }
        }
    }

    async fn fail(&self, message: String) -> ReloadOutcome {
        tracing::warn!("{}", message);
        self.supervisor.stop().await;
        self.events
            .dispatch(&TelemetryEvent::error(ErrorKind::ProfileLoadFailure, message));
        ReloadOutcome::Failed
    }
}

/// FIFO queue of reload requests drained by one worker task
pub struct ReloadPipeline {
    requests: Mutex<Option<mpsc::UnboundedSender<ReloadReason>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReloadPipeline {
    /// Spawn the worker task
    pub fn spawn(worker: ReloadWorker) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReloadReason>();

        let handle = tokio::spawn(async move {
            while let Some(reason) = rx.recv().await {
                tracing::debug!("Reloading profile ({})", reason);
                let outcome = worker.reload().await;
                tracing::debug!("Profile reload finished: {:?}", outcome);
            }
            tracing::debug!("Reload worker exited");
        });

        Self {
            requests: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a reload; returns immediately
    pub fn trigger(&self, reason: ReloadReason) {
        let requests = self.requests.lock().unwrap_or_else(|p| p.into_inner());
        match requests.as_ref() {
            Some(tx) if tx.send(reason).is_ok() => {}
            _ => tracing::debug!("Reload pipeline closed, dropping request ({})", reason),
        }
    }

    /// Stop accepting requests and wait briefly for queued work
    pub async fn shutdown(&self) {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("Abandoning in-flight profile reload");
                abort.abort();
            }
        }
    }
}
