//! Process supervisor integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{wait_until, FakeEngine, HOME_PROFILE};
use tv_core::{EngineError, ProcessState, ProxySelection, TunDevice};
use tv_service::{ProcessSupervisor, SupervisorConfig};

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        start_timeout: Duration::from_millis(100),
        stop_timeout: Duration::from_millis(100),
        liveness_interval: Duration::from_millis(10),
    }
}

fn supervisor(engine: &Arc<FakeEngine>) -> (ProcessSupervisor, mpsc::UnboundedReceiver<ProcessState>) {
    ProcessSupervisor::new(engine.clone(), fast_config())
}

async fn next_transition(rx: &mut mpsc::UnboundedReceiver<ProcessState>) -> ProcessState {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for transition")
        .expect("Transition channel closed")
}

fn tun_device() -> TunDevice {
    TunDevice::new(tempfile::tempfile().unwrap(), 1500)
}

#[tokio::test]
async fn test_start_and_stop_announce_transitions() {
    let engine = FakeEngine::new();
    let (supervisor, mut transitions) = supervisor(&engine);

    assert_eq!(supervisor.current_state(), ProcessState::Stopped);

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.current_state(), ProcessState::Started);
    assert_eq!(next_transition(&mut transitions).await, ProcessState::Started);

    supervisor.stop().await;
    assert_eq!(supervisor.current_state(), ProcessState::Stopped);
    assert_eq!(next_transition(&mut transitions).await, ProcessState::Stopped);
    assert_eq!(engine.stops(), 1);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let engine = FakeEngine::new();
    let (supervisor, mut transitions) = supervisor(&engine);

    supervisor.start().await.unwrap();
    supervisor.start().await.unwrap();

    assert_eq!(engine.starts(), 1);
    assert_eq!(next_transition(&mut transitions).await, ProcessState::Started);
    assert!(transitions.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_while_stopped_is_noop() {
    let engine = FakeEngine::new();
    let (supervisor, mut transitions) = supervisor(&engine);

    supervisor.stop().await;

    assert_eq!(engine.stops(), 0);
    assert!(transitions.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_start_stays_stopped() {
    let engine = FakeEngine::new();
    engine.set_fail_start(true);
    let (supervisor, mut transitions) = supervisor(&engine);

    let result = supervisor.start().await;

    assert!(matches!(result, Err(EngineError::ExitedEarly(_))));
    assert_eq!(supervisor.current_state(), ProcessState::Stopped);
    assert!(transitions.try_recv().is_err());
}

#[tokio::test]
async fn test_hung_start_times_out() {
    let engine = FakeEngine::new();
    engine.set_hang_start(true);
    let (supervisor, _transitions) = supervisor(&engine);

    let result = supervisor.start().await;

    assert!(matches!(result, Err(EngineError::StartTimeout(_))));
    assert_eq!(supervisor.current_state(), ProcessState::Stopped);
}

#[tokio::test]
async fn test_engine_exit_is_detected() {
    let engine = FakeEngine::new();
    let (supervisor, mut transitions) = supervisor(&engine);

    supervisor.start().await.unwrap();
    assert_eq!(next_transition(&mut transitions).await, ProcessState::Started);

    engine.crash();

    assert_eq!(next_transition(&mut transitions).await, ProcessState::Stopped);
    assert_eq!(supervisor.current_state(), ProcessState::Stopped);
}

#[tokio::test]
async fn test_restart_after_exit() {
    let engine = FakeEngine::new();
    let (supervisor, _transitions) = supervisor(&engine);

    supervisor.start().await.unwrap();
    engine.crash();
    assert!(wait_until(|| supervisor.current_state() == ProcessState::Stopped).await);

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.current_state(), ProcessState::Started);
    assert_eq!(engine.starts(), 2);
}

#[tokio::test]
async fn test_load_profile_requires_started() {
    let engine = FakeEngine::new();
    let (supervisor, _transitions) = supervisor(&engine);

    let result = supervisor
        .load_profile(HOME_PROFILE.as_ref(), &ProxySelection::new())
        .await;

    assert!(matches!(result, Err(EngineError::NotRunning)));
    assert_eq!(engine.loads(), 0);
}

#[tokio::test]
async fn test_load_failure_stops_engine() {
    let engine = FakeEngine::new();
    let (supervisor, mut transitions) = supervisor(&engine);
    supervisor.start().await.unwrap();
    assert_eq!(next_transition(&mut transitions).await, ProcessState::Started);

    let result = supervisor
        .load_profile("/profiles/broken.yaml".as_ref(), &ProxySelection::new())
        .await;

    assert!(matches!(result, Err(EngineError::InvalidProfile(_))));
    assert_eq!(supervisor.current_state(), ProcessState::Stopped);
    assert_eq!(next_transition(&mut transitions).await, ProcessState::Stopped);
}

#[tokio::test]
async fn test_load_reports_stale_groups() {
    let engine = FakeEngine::new();
    engine.define_profile(HOME_PROFILE, &[("Proxy", &["tokyo-01"][..])]);
    let (supervisor, _transitions) = supervisor(&engine);
    supervisor.start().await.unwrap();

    let selection: ProxySelection = [("Proxy", "osaka-02"), ("Removed", "x")].into_iter().collect();
    let mut stale = supervisor
        .load_profile(HOME_PROFILE.as_ref(), &selection)
        .await
        .unwrap();
    stale.sort();

    assert_eq!(stale, vec!["Proxy".to_string(), "Removed".to_string()]);
    assert_eq!(supervisor.current_state(), ProcessState::Started);
}

#[tokio::test]
async fn test_attach_tunnel_requires_started() {
    let engine = FakeEngine::new();
    let (supervisor, _transitions) = supervisor(&engine);

    let result = supervisor.attach_tunnel(tun_device()).await;

    assert!(matches!(result, Err(EngineError::NotRunning)));
    assert!(!engine.has_tunnel());
    assert!(!supervisor.tunnel_attached().await);
}

#[tokio::test]
async fn test_attach_and_detach_tunnel() {
    let engine = FakeEngine::new();
    let (supervisor, _transitions) = supervisor(&engine);
    supervisor.start().await.unwrap();

    supervisor.attach_tunnel(tun_device()).await.unwrap();
    assert!(engine.has_tunnel());
    assert!(supervisor.tunnel_attached().await);

    supervisor.detach_tunnel().await.unwrap();
    assert!(!engine.has_tunnel());

    // Detaching again is a no-op
    supervisor.detach_tunnel().await.unwrap();
}

#[tokio::test]
async fn test_stop_releases_tunnel() {
    let engine = FakeEngine::new();
    let (supervisor, _transitions) = supervisor(&engine);
    supervisor.start().await.unwrap();
    supervisor.attach_tunnel(tun_device()).await.unwrap();

    supervisor.stop().await;

    assert!(!supervisor.tunnel_attached().await);
    assert!(!engine.has_tunnel());
}

#[tokio::test]
async fn test_queries_require_started() {
    let engine = FakeEngine::new();
    let (supervisor, _transitions) = supervisor(&engine);

    assert!(matches!(
        supervisor.query_proxies().await,
        Err(EngineError::NotRunning)
    ));
    assert!(matches!(
        supervisor.set_selected_proxy("Proxy", "tokyo-01").await,
        Err(EngineError::NotRunning)
    ));
}

#[tokio::test]
async fn test_state_read_does_not_wait_for_lifecycle() {
    let engine = FakeEngine::new();
    engine.set_hang_start(true);
    let (supervisor, _transitions) = supervisor(&engine);
    let supervisor = Arc::new(supervisor);

    let starting = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.start().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The start holds the lifecycle lock; reading state must not block on it
    assert_eq!(supervisor.current_state(), ProcessState::Stopped);

    let result = starting.await.unwrap();
    assert!(result.is_err());
}
