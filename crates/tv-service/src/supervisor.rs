//! Engine process supervisor
//!
//! The `ProcessSupervisor` is the single owner of the engine lifecycle state.
//! Lifecycle operations (start, stop, tunnel attach, profile load) are
//! serialized behind one async mutex so that no two of them interleave, while
//! the current state is published through a `watch` channel and can be read
//! from any task without waiting.
//!
//! # State machine
//!
//! ```text
//! Stopped --start ok--> Started --stop / engine exit / load failure--> Stopped
//! ```
//!
//! Every transition is also pushed, in order, on the transition channel
//! returned by [`ProcessSupervisor::new`]. The service consumes that channel
//! to announce `Process` events and react to starts and stops.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use tv_core::config::EngineConfig;
use tv_core::traits::Engine;
use tv_core::{EngineError, ProcessState, ProxySelection, ProxySnapshot, TunDevice};

/// Timing knobs of the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on `Engine::start`
    pub start_timeout: Duration,
    /// Upper bound on `Engine::stop`
    pub stop_timeout: Duration,
    /// Interval of the engine liveness check while started
    pub liveness_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for SupervisorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            start_timeout: config.start_timeout,
            stop_timeout: config.stop_timeout,
            liveness_interval: config.liveness_interval,
        }
    }
}

/// Owns the engine handle and its lifecycle state machine
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

struct Shared {
    engine: Arc<dyn Engine>,
    config: SupervisorConfig,
    state: watch::Sender<ProcessState>,
    transitions: mpsc::UnboundedSender<ProcessState>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    /// Cancels the liveness watchdog of the current run
    watchdog: Option<CancellationToken>,
    tunnel_attached: bool,
}

impl ProcessSupervisor {
    /// Create a supervisor in the `Stopped` state
    ///
    /// Returns the supervisor and the receiving end of its transition channel.
    pub fn new(
        engine: Arc<dyn Engine>,
        config: SupervisorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ProcessState>) {
        let (state, _) = watch::channel(ProcessState::Stopped);
        let (transitions, transitions_rx) = mpsc::unbounded_channel();

        let supervisor = Self {
            shared: Arc::new(Shared {
                engine,
                config,
                state,
                transitions,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        };

        (supervisor, transitions_rx)
    }

    /// Current lifecycle state; never blocks
    pub fn current_state(&self) -> ProcessState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.shared.state.subscribe()
    }

    /// The supervised engine
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.shared.engine
    }

    /// Launch the engine if it is stopped
    ///
    /// The transition to `Started` is announced on the transition channel.
    /// On failure the state stays `Stopped`.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;

        if self.current_state().is_started() {
            tracing::debug!("Engine already started, ignoring start request");
            return Ok(());
        }

        tracing::info!("Starting engine");

        let timeout = self.shared.config.start_timeout;
        match tokio::time::timeout(timeout, self.shared.engine.start()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Engine failed to start: {}", e);
                return Err(e);
            }
            Err(_) => {
                tracing::error!("Engine did not start within {:?}", timeout);
                self.shared.stop_engine().await;
                return Err(EngineError::StartTimeout(timeout));
            }
        }

        let token = CancellationToken::new();
        lifecycle.watchdog = Some(token.clone());
        self.shared.set_state(ProcessState::Started);

        tokio::spawn(watch_liveness(Arc::clone(&self.shared), token));

        tracing::info!("Engine started");
        Ok(())
    }

    /// Terminate the engine and force the `Stopped` state
    ///
    /// Best effort: a hung engine is abandoned after the stop timeout.
    pub async fn stop(&self) {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        self.shared.stop_locked(&mut lifecycle, "stop requested").await;
    }

    /// Hand a tunnel device to the running engine
    ///
    /// The device is closed (dropped) when this fails.
    pub async fn attach_tunnel(&self, device: TunDevice) -> Result<(), EngineError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;

        if !self.current_state().is_started() {
            return Err(EngineError::NotRunning);
        }

        let mtu = device.mtu();
        self.shared.engine.attach_tunnel(device).await?;
        lifecycle.tunnel_attached = true;

        tracing::info!(mtu, "Tunnel device attached");
        Ok(())
    }

    /// Release the tunnel device; no-op when none is attached
    pub async fn detach_tunnel(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;

        if !lifecycle.tunnel_attached {
            return Ok(());
        }

        lifecycle.tunnel_attached = false;
        self.shared.engine.detach_tunnel().await?;

        tracing::info!("Tunnel device detached");
        Ok(())
    }

    /// Whether a tunnel device is currently attached
    pub async fn tunnel_attached(&self) -> bool {
        self.shared.lifecycle.lock().await.tunnel_attached
    }

    /// Activate a profile on the running engine
    ///
    /// Returns the groups whose stored selection no longer applies. A load
    /// failure stops the engine: it never keeps running a half-applied
    /// profile.
    pub async fn load_profile(
        &self,
        path: &Path,
        selection: &ProxySelection,
    ) -> Result<Vec<String>, EngineError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;

        if !self.current_state().is_started() {
            return Err(EngineError::NotRunning);
        }

        match self.shared.engine.load_profile(path, selection).await {
            Ok(stale) => Ok(stale),
            Err(e) => {
                tracing::warn!("Profile {:?} failed to load: {}", path, e);
                self.shared
                    .stop_locked(&mut lifecycle, "profile load failed")
                    .await;
                Err(e)
            }
        }
    }

    /// Snapshot of the engine's proxy groups
    pub async fn query_proxies(&self) -> Result<ProxySnapshot, EngineError> {
        if !self.current_state().is_started() {
            return Err(EngineError::NotRunning);
        }
        self.shared.engine.query_proxies().await
    }

    /// Choose the active proxy of a group
    pub async fn set_selected_proxy(&self, group: &str, proxy: &str) -> Result<(), EngineError> {
        if !self.current_state().is_started() {
            return Err(EngineError::NotRunning);
        }
        self.shared.engine.set_selected_proxy(group, proxy).await
    }
}

impl Shared {
    fn set_state(&self, state: ProcessState) {
        self.state.send_replace(state);
        // The receiver only goes away when the service is torn down
        let _ = self.transitions.send(state);
    }

    async fn stop_engine(&self) {
        let timeout = self.config.stop_timeout;
        match tokio::time::timeout(timeout, self.engine.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Engine stop reported an error: {}", e),
            Err(_) => tracing::warn!("Engine did not stop within {:?}, abandoning it", timeout),
        }
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle, reason: &str) {
        if !self.state.borrow().is_started() {
            return;
        }

        tracing::info!("Stopping engine ({})", reason);

        if let Some(watchdog) = lifecycle.watchdog.take() {
            watchdog.cancel();
        }
        lifecycle.tunnel_attached = false;

        // Publish the stop first so pull loops wind down before the engine goes away
        self.set_state(ProcessState::Stopped);
        self.stop_engine().await;
    }
}

/// Poll engine liveness until cancelled or the engine exits on its own
async fn watch_liveness(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.config.liveness_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if shared.engine.is_running() {
                    continue;
                }

                let mut lifecycle = shared.lifecycle.lock().await;
                // A concurrent stop already handled this run
                if cancel.is_cancelled() {
                    break;
                }

                tracing::warn!("Engine exited unexpectedly");
                shared.stop_locked(&mut lifecycle, "engine exited").await;
                break;
            }
        }
    }
}
