//! Tunnel service orchestrator
//!
//! `TunnelService` is the client-facing facade. It wires the supervisor,
//! the event multiplexer, the reload pipeline and the foreground policy
//! together, reacts to engine lifecycle transitions, and turns every
//! collaborator failure into an `Error` event instead of an error return.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tv_core::config::{ForegroundConfig, ServiceConfig};
use tv_core::traits::{Engine, Notifier, Observer, ProfileStore};
use tv_core::{
    ErrorKind, KindSet, ObserverId, ProcessState, ProfileId, ProfileInfo, ProxySelection,
    ProxySnapshot, StoreError, TelemetryEvent, TunDevice,
};

use crate::events::{EventMultiplexer, ObserverRegistry, PullerConfig, TelemetryPuller};
use crate::notify::NotificationObserver;
use crate::policy::{ForegroundPolicy, Visibility};
use crate::profile::{ReloadPipeline, ReloadReason, ReloadWorker};
use crate::supervisor::{ProcessSupervisor, SupervisorConfig};

/// Tunables of the service
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub supervisor: SupervisorConfig,
    pub telemetry: PullerConfig,
    pub foreground: ForegroundConfig,
}

impl From<&ServiceConfig> for ServiceOptions {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            supervisor: SupervisorConfig::from(&config.engine),
            telemetry: PullerConfig::from(&config.telemetry),
            foreground: config.foreground.clone(),
        }
    }
}

/// Orchestrates the engine and everything observing it
pub struct TunnelService {
    supervisor: Arc<ProcessSupervisor>,
    events: Arc<EventMultiplexer>,
    reload: Arc<ReloadPipeline>,
    store: Arc<dyn ProfileStore>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<ForegroundPolicy>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl TunnelService {
    /// Build the service and start its background tasks
    ///
    /// Must be called from within a Tokio runtime. The default subscriber is
    /// registered with the foreground interest set.
    pub fn initialize(
        engine: Arc<dyn Engine>,
        store: Arc<dyn ProfileStore>,
        notifier: Arc<dyn Notifier>,
        options: ServiceOptions,
    ) -> Arc<Self> {
        let (supervisor, transitions) =
            ProcessSupervisor::new(Arc::clone(&engine), options.supervisor);
        let supervisor = Arc::new(supervisor);

        let registry = Arc::new(ObserverRegistry::new());
        let puller = TelemetryPuller::new(
            engine,
            supervisor.subscribe_state(),
            Arc::clone(&registry),
            options.telemetry,
        );
        let events = Arc::new(EventMultiplexer::new(registry, puller));

        let reload = Arc::new(ReloadPipeline::spawn(ReloadWorker::new(
            Arc::clone(&supervisor),
            Arc::clone(&store),
            Arc::clone(&notifier),
            Arc::clone(&events),
        )));

        let default_subscriber: Arc<dyn Observer> =
            Arc::new(NotificationObserver::new(Arc::clone(&notifier)));
        let policy = Arc::new(ForegroundPolicy::new(
            Arc::clone(&events),
            default_subscriber,
            options.foreground,
        ));
        policy.apply(Visibility::Foreground);

        let cancel = CancellationToken::new();
        let handler = TransitionHandler {
            events: Arc::clone(&events),
            reload: Arc::clone(&reload),
            notifier: Arc::clone(&notifier),
        };
        let transitions_task = tokio::spawn(handler.run(transitions, cancel.clone()));

        tracing::info!("Tunnel service initialized");

        Arc::new(Self {
            supervisor,
            events,
            reload,
            store,
            notifier,
            policy,
            cancel,
            tasks: Mutex::new(vec![transitions_task]),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start the engine; failures surface as `StartFailure` events
    pub async fn start(&self) {
        if let Err(e) = self.supervisor.start().await {
            self.report(ErrorKind::StartFailure, e);
        }
    }

    /// Stop the engine
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    /// Attach a tunnel device to the running engine
    ///
    /// On failure the device is closed and a `StartFailure` event is emitted.
    pub async fn start_tunnel_device(&self, device: TunDevice) {
        self.notifier.set_vpn_active(true);

        if let Err(e) = self.supervisor.attach_tunnel(device).await {
            self.notifier.set_vpn_active(false);
            self.report(ErrorKind::StartFailure, format!("Tunnel attach failed: {}", e));
        }
    }

    /// Detach the tunnel device; no-op when none is attached
    pub async fn stop_tunnel_device(&self) {
        self.notifier.set_vpn_active(false);

        if let Err(e) = self.supervisor.detach_tunnel().await {
            tracing::warn!("Tunnel detach failed: {}", e);
        }
    }

    /// Choose `proxy` for `group` and remember it for the active profile
    pub async fn set_selected_proxy(&self, group: &str, proxy: &str) {
        if let Err(e) = self.supervisor.set_selected_proxy(group, proxy).await {
            self.report(
                ErrorKind::SetProxySelected,
                format!("Failed to select {} for {}: {}", proxy, group, e),
            );
            return;
        }

        let persisted = match self.store.query_active_profile().await {
            Ok(Some(profile)) => {
                self.store
                    .set_profile_selected_proxy(profile.id, group, proxy)
                    .await
            }
            Ok(None) => {
                tracing::debug!("No active profile, selection not persisted");
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = persisted {
            self.report(
                ErrorKind::SetProxySelected,
                format!("Failed to persist selection of {}: {}", group, e),
            );
        }
    }

    /// Snapshot of all proxy groups
    ///
    /// Never fails: on error an empty snapshot for the `Unknown` group is
    /// returned and a `QueryProxyFailure` event is emitted.
    pub async fn query_all_proxies(&self) -> ProxySnapshot {
        match self.supervisor.query_proxies().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.report(ErrorKind::QueryProxyFailure, e);
                ProxySnapshot::default()
            }
        }
    }

    /// Current engine state; never blocks
    pub fn current_process_state(&self) -> ProcessState {
        self.supervisor.current_state()
    }

    /// Observer registration surface
    pub fn event_channel(&self) -> EventChannel {
        EventChannel {
            events: Arc::clone(&self.events),
        }
    }

    /// Profile management surface
    pub fn profile_channel(&self) -> ProfileChannel {
        ProfileChannel {
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            reload: Arc::clone(&self.reload),
        }
    }

    /// Apply a foreground/background signal
    pub fn set_foreground(&self, foreground: bool) {
        if self.shut_down.load(Ordering::SeqCst) {
            tracing::debug!("Ignoring visibility signal after shutdown");
            return;
        }
        self.policy.apply(Visibility::from(foreground));
    }

    /// Follow an external visibility signal source until shutdown
    pub fn attach_visibility_source(&self, signals: mpsc::Receiver<Visibility>) {
        let task = self.policy.follow(signals, self.cancel.child_token());
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(task);
    }

    /// The event multiplexer (for inspection)
    pub fn events(&self) -> &Arc<EventMultiplexer> {
        &self.events
    }

    /// Tear everything down: stop the engine, release observers and tasks
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Shutting down tunnel service");

        self.reload.shutdown().await;
        self.supervisor.stop().await;

        // Visibility followers must be gone before the default subscriber
        // is released, or a queued signal re-registers it
        self.cancel.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::debug!("Service task ended abnormally: {}", e);
            }
        }

        self.events.halt_pulls();
        self.policy.release();

        tracing::info!("Tunnel service shut down");
    }

    fn report(&self, kind: ErrorKind, error: impl std::fmt::Display) {
        tracing::error!("{}: {}", kind, error);
        self.events.dispatch(&TelemetryEvent::error(kind, error));
    }
}

/// Reacts to engine lifecycle transitions, in order
struct TransitionHandler {
    events: Arc<EventMultiplexer>,
    reload: Arc<ReloadPipeline>,
    notifier: Arc<dyn Notifier>,
}

impl TransitionHandler {
    async fn run(
        self,
        mut transitions: mpsc::UnboundedReceiver<ProcessState>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                // Drain queued transitions before honoring cancellation
                biased;
                transition = transitions.recv() => match transition {
                    Some(state) => self.handle(state),
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
    }

    fn handle(&self, state: ProcessState) {
        tracing::debug!("Engine transitioned to {}", state);
        self.events.dispatch(&TelemetryEvent::Process { state });

        match state {
            ProcessState::Started => {
                self.reload.trigger(ReloadReason::ProcessStarted);
                self.notifier.show();
                self.events.recast_event_requirement();
            }
            ProcessState::Stopped => {
                self.events.halt_pulls();
                self.events.dispatch(&TelemetryEvent::zero_speed());
                self.events.dispatch(&TelemetryEvent::zero_bandwidth());
                self.notifier.cancel();
            }
        }
    }
}

/// Observer registration surface of the service
#[derive(Clone)]
pub struct EventChannel {
    events: Arc<EventMultiplexer>,
}

impl EventChannel {
    /// Register `observer` for `kinds`, replacing any earlier registration of `id`
    pub fn register_observer(&self, id: ObserverId, observer: Arc<dyn Observer>, kinds: KindSet) {
        self.events.register_observer(id, observer, kinds);
    }

    /// Remove the registration of `id`
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.events.unregister_observer(id)
    }

    /// Register a channel-backed observer
    ///
    /// The registration is dropped together with the returned subscription.
    pub fn subscribe(&self, kinds: KindSet) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ObserverId::new();
        let subscription = Subscription {
            id,
            sender: tx,
            receiver: rx,
            channel: self.clone(),
        };
        subscription.set_kinds(kinds);
        subscription
    }
}

/// Channel-backed observer registration
pub struct Subscription {
    id: ObserverId,
    sender: mpsc::UnboundedSender<TelemetryEvent>,
    receiver: mpsc::UnboundedReceiver<TelemetryEvent>,
    channel: EventChannel,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Replace the interest set
    pub fn set_kinds(&self, kinds: KindSet) {
        let observer: Arc<dyn Observer> = Arc::new(self.sender.clone());
        self.channel.register_observer(self.id, observer, kinds);
    }

    /// Next event
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        self.receiver.recv().await
    }

    /// Next event, if one is already queued
    pub fn try_recv(&mut self) -> Option<TelemetryEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unregister_observer(self.id);
    }
}

/// Profile management surface of the service
#[derive(Clone)]
pub struct ProfileChannel {
    store: Arc<dyn ProfileStore>,
    events: Arc<EventMultiplexer>,
    reload: Arc<ReloadPipeline>,
}

impl ProfileChannel {
    /// Every stored profile
    pub async fn list_profiles(&self) -> Result<Vec<ProfileInfo>, StoreError> {
        self.store.list_profiles().await
    }

    /// Import a profile file
    pub async fn create_profile(&self, name: &str, source: &Path) -> Result<ProfileInfo, StoreError> {
        let profile = self.store.create_profile(name, source).await?;
        let active = matches!(
            self.store.query_active_profile().await,
            Ok(Some(ref p)) if p.id == profile.id
        );
        self.notify_profile_changed();

        Ok(ProfileInfo {
            id: profile.id,
            name: profile.name,
            cache_path: profile.cache_path,
            active,
        })
    }

    /// Make a profile active
    pub async fn activate_profile(&self, id: ProfileId) -> Result<(), StoreError> {
        self.store.set_active_profile(id).await?;
        self.notify_profile_changed();
        Ok(())
    }

    /// Delete a profile
    pub async fn delete_profile(&self, id: ProfileId) -> Result<(), StoreError> {
        self.store.delete_profile(id).await?;
        self.notify_profile_changed();
        Ok(())
    }

    /// Proxy choices stored for the active profile
    pub async fn active_selection(&self) -> Result<ProxySelection, StoreError> {
        match self.store.query_active_profile().await? {
            Some(profile) => self.store.query_profile_selected_proxies(profile.id).await,
            None => Ok(ProxySelection::new()),
        }
    }

    /// Announce a profile change and reload the active profile
    pub fn notify_profile_changed(&self) {
        self.events.dispatch(&TelemetryEvent::ProfileChanged);
        self.reload.trigger(ReloadReason::ProfileChanged);
    }

    /// Queue a reload of the active profile
    pub fn reload(&self) {
        self.reload.trigger(ReloadReason::Requested);
    }
}
