// Integration tests supervising real processes through /bin/sh

#![cfg(unix)]

use overseer::process::ExitStatusInfo;
use overseer::{AppSpec, AppState, ExitReason, Phase, StopCause, Supervisor, SupervisorSettings};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

fn shell_app(name: &str, script: &str, logs: &Path) -> AppSpec {
    let mut spec = AppSpec::new(name, "/bin/sh");
    spec.args = vec!["-c".to_string(), script.to_string()];
    spec.out_file = Some(logs.join(format!("{}-out.log", name)));
    spec.error_file = Some(logs.join(format!("{}-error.log", name)));
    spec
}

async fn wait_for<F>(status: &mut watch::Receiver<AppState>, within: Duration, predicate: F) -> AppState
where
    F: FnMut(&AppState) -> bool,
{
    let state = tokio::time::timeout(within, status.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("app task ended");
    state.clone()
}

#[tokio::test]
async fn test_output_is_captured_with_timestamps() {
    let dir = TempDir::new().unwrap();
    let mut spec = shell_app("echoer", "echo hello; echo oops >&2", dir.path());
    spec.autorestart = false;

    let supervisor = Supervisor::new(vec![spec], SupervisorSettings::default());
    let mut status = supervisor.subscribe("echoer").unwrap();
    supervisor.start("echoer").await.unwrap();

    let state = wait_for(&mut status, Duration::from_secs(10), |s| {
        s.phase == Phase::Stopped(StopCause::AutorestartDisabled)
    })
    .await;
    assert_eq!(state.last_exit_status, Some(ExitStatusInfo::code(0)));

    let out = fs::read_to_string(dir.path().join("echoer-out.log")).unwrap();
    let err = fs::read_to_string(dir.path().join("echoer-error.log")).unwrap();
    assert!(out.starts_with('['));
    assert!(out.trim_end().ends_with("] hello"));
    assert!(err.trim_end().ends_with("] oops"));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_crashing_app_exhausts_restart_budget() {
    let dir = TempDir::new().unwrap();
    let mut spec = shell_app("crasher", "exit 3", dir.path());
    spec.max_restarts = 2;
    spec.restart_delay = Duration::from_millis(50);

    let supervisor = Supervisor::new(vec![spec], SupervisorSettings::default());
    let mut status = supervisor.subscribe("crasher").unwrap();
    supervisor.start("crasher").await.unwrap();

    let state = wait_for(&mut status, Duration::from_secs(10), |s| {
        s.phase == Phase::Stopped(StopCause::RestartBudgetExhausted)
    })
    .await;

    assert_eq!(state.total_restarts, 2);
    assert_eq!(state.last_exit_reason, Some(ExitReason::Crash));
    assert_eq!(state.last_exit_status, Some(ExitStatusInfo::code(3)));
    assert_eq!(state.pid, None);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_graceful_stop_terminates_process() {
    let dir = TempDir::new().unwrap();
    let spec = shell_app("sleeper", "exec sleep 30", dir.path());

    let supervisor = Supervisor::new(vec![spec], SupervisorSettings::default());
    supervisor.start("sleeper").await.unwrap();
    assert!(supervisor.status("sleeper").unwrap().pid.is_some());

    supervisor.stop_gracefully("sleeper").await.unwrap();

    let state = supervisor.status("sleeper").unwrap();
    assert_eq!(state.phase, Phase::Stopped(StopCause::ManualStop));
    assert_eq!(state.last_exit_status, Some(ExitStatusInfo::signaled(15)));
    assert!(!state.killed_after_timeout);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_process_ignoring_stop_signal_is_killed() {
    let dir = TempDir::new().unwrap();
    let mut spec = shell_app(
        "stubborn",
        "trap '' TERM; while true; do sleep 0.1; done",
        dir.path(),
    );
    spec.kill_timeout = Duration::from_millis(500);

    let supervisor = Supervisor::new(vec![spec], SupervisorSettings::default());
    supervisor.start("stubborn").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    supervisor.stop_gracefully("stubborn").await.unwrap();
    let elapsed = started.elapsed();

    let state = supervisor.status("stubborn").unwrap();
    assert_eq!(state.phase, Phase::Stopped(StopCause::ManualStop));
    assert!(state.killed_after_timeout);
    assert_eq!(state.last_exit_status, Some(ExitStatusInfo::signaled(9)));
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(5));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_environment_overlay_and_cwd() {
    let dir = TempDir::new().unwrap();
    let mut spec = shell_app("env", "echo \"$GREETING from $(pwd)\"", dir.path());
    spec.autorestart = false;
    spec.cwd = Some(dir.path().to_path_buf());
    spec.env.insert("GREETING".to_string(), "hi".to_string());

    let supervisor = Supervisor::new(vec![spec], SupervisorSettings::default());
    let mut status = supervisor.subscribe("env").unwrap();
    supervisor.start("env").await.unwrap();

    wait_for(&mut status, Duration::from_secs(10), |s| s.phase.is_terminal()).await;

    let out = fs::read_to_string(dir.path().join("env-out.log")).unwrap();
    let cwd = dir.path().canonicalize().unwrap();
    assert!(out.contains(&format!("hi from {}", cwd.display())));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_missing_executable_fails_start() {
    let dir = TempDir::new().unwrap();
    let mut spec = AppSpec::new("ghost", dir.path().join("does-not-exist"));
    spec.out_file = Some(dir.path().join("ghost-out.log"));
    spec.error_file = Some(dir.path().join("ghost-error.log"));
    spec.autorestart = false;

    let supervisor = Supervisor::new(vec![spec], SupervisorSettings::default());
    let mut status = supervisor.subscribe("ghost").unwrap();
    assert!(supervisor.start("ghost").await.is_err());

    let state = wait_for(&mut status, Duration::from_secs(10), |s| {
        s.phase == Phase::Stopped(StopCause::AutorestartDisabled)
    })
    .await;
    assert_eq!(state.last_exit_reason, Some(ExitReason::StartupFailure));
    assert_eq!(state.pid, None);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_every_app() {
    let dir = TempDir::new().unwrap();
    let apps = vec![
        shell_app("one", "exec sleep 30", dir.path()),
        shell_app("two", "exec sleep 30", dir.path()),
    ];

    let supervisor = Supervisor::new(apps, SupervisorSettings::default());
    assert!(supervisor.start_all().await.is_empty());

    let states = tokio::time::timeout(Duration::from_secs(10), supervisor.shutdown())
        .await
        .unwrap();

    assert_eq!(states.len(), 2);
    for state in states {
        assert_eq!(state.phase, Phase::Stopped(StopCause::Shutdown));
        assert_eq!(state.pid, None);
    }
}
