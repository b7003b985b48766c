//! Shared fakes for the service integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as stream_channel;
use futures::StreamExt;

use tv_core::config::ForegroundConfig;
use tv_core::traits::{Engine, LogStream, Notifier, ProfileStore};
use tv_core::{
    EngineError, KindSet, LogEvent, LogLevel, Profile, ProfileId, ProfileInfo, ProxyGroup,
    ProxySelection, ProxySnapshot, StoreError, TelemetryEvent, TrafficTotals, TunDevice,
};
use tv_service::events::PullerConfig;
use tv_service::{ServiceOptions, Subscription, SupervisorConfig, TunnelService};

pub const HOME_PROFILE: &str = "/profiles/home.yaml";
pub const HOME_ID: ProfileId = ProfileId(1);

// ============================================================================
// Engine
// ============================================================================

#[derive(Default)]
struct EngineState {
    definitions: HashMap<PathBuf, BTreeMap<String, ProxyGroup>>,
    loaded: Option<PathBuf>,
    selected: BTreeMap<String, String>,
    traffic: TrafficTotals,
    tunnel: Option<TunDevice>,
    log_senders: Vec<stream_channel::UnboundedSender<Result<LogEvent, EngineError>>>,
}

/// In-memory engine with failure switches and call counters
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<EngineState>,
    running: AtomicBool,
    fail_start: AtomicBool,
    hang_start: AtomicBool,
    fail_traffic: AtomicBool,
    fail_proxies: AtomicBool,
    load_delay_ms: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    loads: AtomicUsize,
    loads_in_flight: AtomicUsize,
    max_loads_in_flight: AtomicUsize,
    traffic_queries: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Define the groups a profile path loads into
    pub fn define_profile(&self, path: &str, groups: &[(&str, &[&str])]) {
        let groups = groups
            .iter()
            .map(|(name, members)| {
                (
                    name.to_string(),
                    ProxyGroup {
                        kind: "Selector".to_string(),
                        now: members.first().map(|m| m.to_string()),
                        proxies: members.iter().map(|m| m.to_string()).collect(),
                    },
                )
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .definitions
            .insert(PathBuf::from(path), groups);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_hang_start(&self, hang: bool) {
        self.hang_start.store(hang, Ordering::SeqCst);
    }

    pub fn set_fail_traffic(&self, fail: bool) {
        self.fail_traffic.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_proxies(&self, fail: bool) {
        self.fail_proxies.store(fail, Ordering::SeqCst);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        self.load_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Simulate the engine process dying
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Push a log line to every open log stream
    pub fn emit_log(&self, payload: &str) {
        let state = self.state.lock().unwrap();
        for sender in &state.log_senders {
            let _ = sender.unbounded_send(Ok(LogEvent {
                level: LogLevel::Info,
                payload: payload.to_string(),
            }));
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn max_loads_in_flight(&self) -> usize {
        self.max_loads_in_flight.load(Ordering::SeqCst)
    }

    pub fn traffic_queries(&self) -> usize {
        self.traffic_queries.load(Ordering::SeqCst)
    }

    pub fn loaded(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().loaded.clone()
    }

    pub fn selected(&self, group: &str) -> Option<String> {
        self.state.lock().unwrap().selected.get(group).cloned()
    }

    pub fn has_tunnel(&self) -> bool {
        self.state.lock().unwrap().tunnel.is_some()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn start(&self) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::ExitedEarly("exit status: 1".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.loaded = None;
        state.selected.clear();
        state.tunnel = None;
        state.traffic = TrafficTotals::default();
        state.log_senders.clear();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn attach_tunnel(&self, device: TunDevice) -> Result<(), EngineError> {
        self.state.lock().unwrap().tunnel = Some(device);
        Ok(())
    }

    async fn detach_tunnel(&self) -> Result<(), EngineError> {
        self.state.lock().unwrap().tunnel = None;
        Ok(())
    }

    async fn load_profile(
        &self,
        path: &Path,
        selection: &ProxySelection,
    ) -> Result<Vec<String>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.loads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_loads_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.load_delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let result = {
            let mut state = self.state.lock().unwrap();
            match state.definitions.get(path).cloned() {
                Some(groups) => {
                    let mut stale = Vec::new();
                    let mut selected = BTreeMap::new();
                    for (group, proxy) in selection.iter() {
                        match groups.get(group) {
                            Some(g) if g.contains(proxy) => {
                                selected.insert(group.to_string(), proxy.to_string());
                            }
                            _ => stale.push(group.to_string()),
                        }
                    }
                    state.loaded = Some(path.to_path_buf());
                    state.selected = selected;
                    Ok(stale)
                }
                None => Err(EngineError::InvalidProfile(format!(
                    "{}: no such profile",
                    path.display()
                ))),
            }
        };

        self.loads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn query_proxies(&self) -> Result<ProxySnapshot, EngineError> {
        if self.fail_proxies.load(Ordering::SeqCst) {
            return Err(EngineError::Controller("connection refused".to_string()));
        }
        let state = self.state.lock().unwrap();
        let loaded = state.loaded.as_ref().ok_or(EngineError::NotRunning)?;
        let mut groups = state.definitions.get(loaded).cloned().unwrap_or_default();
        for (group, proxy) in &state.selected {
            if let Some(g) = groups.get_mut(group) {
                g.now = Some(proxy.clone());
            }
        }
        let current_group = groups
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "DIRECT".to_string());
        Ok(ProxySnapshot {
            current_group,
            groups,
        })
    }

    async fn set_selected_proxy(&self, group: &str, proxy: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        let loaded = state.loaded.clone().ok_or(EngineError::NotRunning)?;
        let known = state
            .definitions
            .get(&loaded)
            .and_then(|groups| groups.get(group))
            .map(|g| g.contains(proxy))
            .unwrap_or(false);
        if !known {
            return Err(EngineError::Status {
                status: 400,
                message: format!("{} is not a member of {}", proxy, group),
            });
        }
        state.selected.insert(group.to_string(), proxy.to_string());
        Ok(())
    }

    async fn query_traffic(&self) -> Result<TrafficTotals, EngineError> {
        self.traffic_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_traffic.load(Ordering::SeqCst) {
            return Err(EngineError::Controller("connection refused".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.traffic.upload += 100;
        state.traffic.download += 300;
        Ok(state.traffic)
    }

    async fn open_log_stream(&self, _level: LogLevel) -> Result<LogStream, EngineError> {
        let (tx, rx) = stream_channel::unbounded();
        self.state.lock().unwrap().log_senders.push(tx);
        Ok(rx.boxed())
    }
}

// ============================================================================
// Profile store
// ============================================================================

#[derive(Default)]
struct StoreState {
    profiles: Vec<Profile>,
    active: Option<ProfileId>,
}

/// In-memory profile store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    fail_queries: AtomicBool,
    query_delay_ms: AtomicUsize,
    queries_in_flight: AtomicUsize,
    max_queries_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a profile pointing at `path` and make it active
    pub fn add_active(&self, name: &str, path: &str) -> ProfileId {
        let mut state = self.state.lock().unwrap();
        let id = ProfileId(state.profiles.len() as u64 + 1);
        state.profiles.push(Profile {
            id,
            name: name.to_string(),
            cache_path: PathBuf::from(path),
            selected: ProxySelection::new(),
        });
        state.active = Some(id);
        id
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make active-profile lookups take at least `delay`
    pub fn set_query_delay(&self, delay: Duration) {
        self.query_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Highest number of concurrent active-profile lookups seen
    pub fn max_queries_in_flight(&self) -> usize {
        self.max_queries_in_flight.load(Ordering::SeqCst)
    }

    pub fn selection(&self, id: ProfileId) -> ProxySelection {
        let state = self.state.lock().unwrap();
        state
            .profiles
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.selected.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Invalid("database locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn query_active_profile(&self) -> Result<Option<Profile>, StoreError> {
        let in_flight = self.queries_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_queries_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let result = self.check().map(|()| {
            let state = self.state.lock().unwrap();
            state
                .active
                .and_then(|id| state.profiles.iter().find(|p| p.id == id))
                .cloned()
        });

        self.queries_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn query_profile_selected_proxies(
        &self,
        id: ProfileId,
    ) -> Result<ProxySelection, StoreError> {
        self.check()?;
        let state = self.state.lock().unwrap();
        state
            .profiles
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.selected.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_profile_selected_proxy(
        &self,
        id: ProfileId,
        group: &str,
        proxy: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;
        profile.selected.select(group, proxy);
        Ok(())
    }

    async fn remove_proxy_selections(
        &self,
        id: ProfileId,
        groups: &[String],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let profile = state
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))?;
        profile.selected.remove_groups(groups);
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileInfo>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .profiles
            .iter()
            .map(|p| ProfileInfo {
                id: p.id,
                name: p.name.clone(),
                cache_path: p.cache_path.clone(),
                active: state.active == Some(p.id),
            })
            .collect())
    }

    async fn create_profile(&self, name: &str, source: &Path) -> Result<Profile, StoreError> {
        let mut state = self.state.lock().unwrap();
        let id = ProfileId(state.profiles.len() as u64 + 1);
        let profile = Profile {
            id,
            name: name.to_string(),
            cache_path: source.to_path_buf(),
            selected: ProxySelection::new(),
        };
        state.profiles.push(profile.clone());
        if state.active.is_none() {
            state.active = Some(id);
        }
        Ok(profile)
    }

    async fn set_active_profile(&self, id: ProfileId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.profiles.iter().any(|p| p.id == id) {
            return Err(StoreError::NotFound(id));
        }
        state.active = Some(id);
        Ok(())
    }

    async fn delete_profile(&self, id: ProfileId) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let before = state.profiles.len();
        state.profiles.retain(|p| p.id != id);
        if state.profiles.len() == before {
            return Err(StoreError::NotFound(id));
        }
        if state.active == Some(id) {
            state.active = None;
        }
        Ok(())
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierCall {
    Show,
    Cancel,
    Speed(u64, u64),
    Profile(String),
    VpnActive(bool),
}

/// Notifier that records every call
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifierCall>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<NotifierCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contains(&self, call: &NotifierCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    fn record(&self, call: NotifierCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self) {
        self.record(NotifierCall::Show);
    }

    fn cancel(&self) {
        self.record(NotifierCall::Cancel);
    }

    fn set_speed(&self, up: u64, down: u64) {
        self.record(NotifierCall::Speed(up, down));
    }

    fn set_profile(&self, name: &str) {
        self.record(NotifierCall::Profile(name.to_string()));
    }

    fn set_vpn_active(&self, active: bool) {
        self.record(NotifierCall::VpnActive(active));
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Short timings; the default subscriber wants nothing so tests control interests
pub fn fast_options() -> ServiceOptions {
    ServiceOptions {
        supervisor: SupervisorConfig {
            start_timeout: Duration::from_millis(200),
            stop_timeout: Duration::from_millis(200),
            liveness_interval: Duration::from_millis(10),
        },
        telemetry: PullerConfig {
            speed_interval: Duration::from_millis(10),
            bandwidth_interval: Duration::from_millis(10),
            log_level: LogLevel::Info,
        },
        foreground: ForegroundConfig {
            foreground: KindSet::empty(),
            background: KindSet::empty(),
        },
    }
}

pub struct Harness {
    pub service: Arc<TunnelService>,
    pub engine: Arc<FakeEngine>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Service with an active `home` profile of one `Proxy` group
    pub fn new() -> Self {
        Self::with_options(fast_options())
    }

    pub fn with_options(options: ServiceOptions) -> Self {
        let harness = Self::bare(options);
        harness
            .engine
            .define_profile(HOME_PROFILE, &[("Proxy", &["tokyo-01", "osaka-02"][..])]);
        let id = harness.store.add_active("home", HOME_PROFILE);
        assert_eq!(id, HOME_ID);
        harness
    }

    /// Service without any stored profile
    pub fn bare(options: ServiceOptions) -> Self {
        let engine = FakeEngine::new();
        let store = MemoryStore::new();
        let notifier = RecordingNotifier::new();
        let service = TunnelService::initialize(
            engine.clone(),
            store.clone(),
            notifier.clone(),
            options,
        );
        Self {
            service,
            engine,
            store,
            notifier,
        }
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Poll an async `condition` until it holds or two seconds pass
pub async fn wait_until_async<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

/// Next event satisfying `matches`, skipping others
pub async fn next_matching(
    subscription: &mut Subscription,
    mut matches: impl FnMut(&TelemetryEvent) -> bool,
) -> Option<TelemetryEvent> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = subscription.recv().await {
            if matches(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Every event queued right now
pub fn drain(subscription: &mut Subscription) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}
