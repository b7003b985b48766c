//! Telemetry pull loops
//!
//! One cancellable loop per pulled event kind (speed, bandwidth, log). A loop
//! only runs while the engine is started: `start` refuses to spawn while
//! stopped, and a running loop exits on its own as soon as it sees the state
//! leave `Started`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tv_core::config::TelemetryConfig;
use tv_core::traits::Engine;
use tv_core::{
    ErrorKind, EventKind, KindSet, LogLevel, ProcessState, TelemetryEvent, TrafficTotals,
};

use super::ObserverRegistry;

/// Delay before reopening a log stream the engine closed
const LOG_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Pull loop settings
#[derive(Debug, Clone)]
pub struct PullerConfig {
    pub speed_interval: Duration,
    pub bandwidth_interval: Duration,
    pub log_level: LogLevel,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self::from(&TelemetryConfig::default())
    }
}

impl From<&TelemetryConfig> for PullerConfig {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            speed_interval: config.speed_interval,
            bandwidth_interval: config.bandwidth_interval,
            log_level: config.log_level,
        }
    }
}

/// Starts and cancels the per-kind pull loops
pub struct TelemetryPuller {
    engine: Arc<dyn Engine>,
    state: watch::Receiver<ProcessState>,
    sink: Arc<ObserverRegistry>,
    config: PullerConfig,
    loops: DashMap<EventKind, CancellationToken>,
}

impl TelemetryPuller {
    /// Create a puller that reads from `engine` and dispatches into `sink`
    pub fn new(
        engine: Arc<dyn Engine>,
        state: watch::Receiver<ProcessState>,
        sink: Arc<ObserverRegistry>,
        config: PullerConfig,
    ) -> Self {
        Self {
            engine,
            state,
            sink,
            config,
            loops: DashMap::new(),
        }
    }

    /// Start the loop for `kind`
    ///
    /// No-op for kinds that are not pulled, when the loop is already active,
    /// or while the engine is stopped. Returns whether a loop was spawned.
    pub fn start(&self, kind: EventKind) -> bool {
        if !kind.is_pulled() {
            return false;
        }

        // The state check happens under the entry lock so a concurrent
        // `stop_all` after a stop transition cannot miss this loop.
        match self.loops.entry(kind) {
            Entry::Occupied(entry) if !entry.get().is_cancelled() => false,
            entry => {
                if !self.state.borrow().is_started() {
                    return false;
                }

                let token = CancellationToken::new();
                self.spawn_loop(kind, token.clone());

                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(token);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(token);
                    }
                }

                tracing::debug!("Started {} pull loop", kind);
                true
            }
        }
    }

    /// Cancel the loop for `kind`, if any
    pub fn stop(&self, kind: EventKind) {
        if let Some((_, token)) = self.loops.remove(&kind) {
            token.cancel();
            tracing::debug!("Stopped {} pull loop", kind);
        }
    }

    /// Cancel every loop
    pub fn stop_all(&self) {
        self.loops.retain(|kind, token| {
            token.cancel();
            tracing::debug!("Stopped {} pull loop", kind);
            false
        });
    }

    /// Whether the loop for `kind` is running
    pub fn is_active(&self, kind: EventKind) -> bool {
        self.loops
            .get(&kind)
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }

    /// Kinds with a running loop
    pub fn active_kinds(&self) -> KindSet {
        self.loops
            .iter()
            .filter(|entry| !entry.value().is_cancelled())
            .map(|entry| *entry.key())
            .collect()
    }

    fn spawn_loop(&self, kind: EventKind, cancel: CancellationToken) {
        let engine = Arc::clone(&self.engine);
        let sink = Arc::clone(&self.sink);
        let state = self.state.clone();

        match kind {
            EventKind::Speed => {
                tokio::spawn(poll_traffic(
                    engine,
                    sink,
                    state,
                    cancel,
                    self.config.speed_interval,
                    Sampler::Speed { last: None },
                ));
            }
            EventKind::Bandwidth => {
                tokio::spawn(poll_traffic(
                    engine,
                    sink,
                    state,
                    cancel,
                    self.config.bandwidth_interval,
                    Sampler::Bandwidth,
                ));
            }
            EventKind::Log => {
                tokio::spawn(stream_logs(engine, sink, state, cancel, self.config.log_level));
            }
            _ => {}
        }
    }
}

/// Turns cumulative traffic counters into events
enum Sampler {
    Speed { last: Option<(TrafficTotals, Instant)> },
    Bandwidth,
}

impl Sampler {
    fn kind(&self) -> EventKind {
        match self {
            Sampler::Speed { .. } => EventKind::Speed,
            Sampler::Bandwidth => EventKind::Bandwidth,
        }
    }

    fn sample(&mut self, totals: TrafficTotals, now: Instant) -> Option<TelemetryEvent> {
        match self {
            Sampler::Bandwidth => Some(TelemetryEvent::Bandwidth {
                total: totals.total(),
            }),
            Sampler::Speed { last } => {
                let event = last.map(|(previous, at)| {
                    let elapsed = now.duration_since(at).as_secs_f64();
                    TelemetryEvent::Speed {
                        up: rate(previous.upload, totals.upload, elapsed),
                        down: rate(previous.download, totals.download, elapsed),
                    }
                });
                *last = Some((totals, now));
                event
            }
        }
    }
}

/// Bytes per second between two counter readings
///
/// A counter that went backwards (engine restarted its accounting) reads as
/// zero rather than wrapping.
fn rate(previous: u64, current: u64, elapsed_secs: f64) -> u64 {
    if elapsed_secs <= 0.0 {
        return 0;
    }
    (current.saturating_sub(previous) as f64 / elapsed_secs).round() as u64
}

/// Tracks whether the last read failed so a persistent failure is reported once
#[derive(Default)]
struct FailureLatch {
    failing: bool,
}

impl FailureLatch {
    fn fail(&mut self, sink: &ObserverRegistry, kind: EventKind, error: impl std::fmt::Display) {
        if self.failing {
            tracing::debug!("{} pull still failing: {}", kind, error);
            return;
        }
        self.failing = true;
        tracing::warn!("{} pull failed: {}", kind, error);
        sink.dispatch(&TelemetryEvent::error(
            ErrorKind::QueryProxyFailure,
            format!("{} pull failed: {}", kind, error),
        ));
    }

    fn recover(&mut self) {
        self.failing = false;
    }
}

fn still_started(state: &mut watch::Receiver<ProcessState>) -> bool {
    state.borrow_and_update().is_started()
}

async fn poll_traffic(
    engine: Arc<dyn Engine>,
    sink: Arc<ObserverRegistry>,
    mut state: watch::Receiver<ProcessState>,
    cancel: CancellationToken,
    interval: Duration,
    mut sampler: Sampler,
) {
    let kind = sampler.kind();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut latch = FailureLatch::default();

    if still_started(&mut state) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() || !still_started(&mut state) {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = engine.query_traffic() => result,
                    };

                    match result {
                        Ok(totals) => {
                            latch.recover();
                            if let Some(event) = sampler.sample(totals, Instant::now()) {
                                sink.dispatch_if(&event, || !cancel.is_cancelled());
                            }
                        }
                        Err(e) => {
                            if !still_started(&mut state) {
                                break;
                            }
                            latch.fail(&sink, kind, e);
                        }
                    }
                }
            }
        }
    }

    cancel.cancel();
    tracing::trace!("{} pull loop exited", kind);
}

async fn stream_logs(
    engine: Arc<dyn Engine>,
    sink: Arc<ObserverRegistry>,
    mut state: watch::Receiver<ProcessState>,
    cancel: CancellationToken,
    level: LogLevel,
) {
    let mut latch = FailureLatch::default();

    'session: while still_started(&mut state) && !cancel.is_cancelled() {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'session,
            opened = engine.open_log_stream(level) => opened,
        };

        match opened {
            Ok(mut logs) => loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'session,
                    changed = state.changed() => {
                        if changed.is_err() || !still_started(&mut state) {
                            break 'session;
                        }
                    }
                    item = logs.next() => match item {
                        Some(Ok(line)) => {
                            latch.recover();
                            sink.dispatch_if(&TelemetryEvent::Log(line), || !cancel.is_cancelled());
                        }
                        Some(Err(e)) => {
                            if still_started(&mut state) {
                                latch.fail(&sink, EventKind::Log, e);
                            }
                            break;
                        }
                        None => {
                            tracing::debug!("Engine closed the log stream");
                            break;
                        }
                    },
                }
            },
            Err(e) => {
                if !still_started(&mut state) {
                    break 'session;
                }
                latch.fail(&sink, EventKind::Log, e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break 'session,
            _ = tokio::time::sleep(LOG_RECONNECT_DELAY) => {}
        }
    }

    cancel.cancel();
    tracing::trace!("log pull loop exited");
}
