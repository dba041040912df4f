use crate::config::AppSpec;
use crate::error::{OverseerError, Result};
use crate::logs::LogSink;
use crate::process::backend::{MemorySampler, ProcessBackend, ProcessControl, SpawnedProcess};
use crate::process::monitor::SysinfoSampler;
use crate::process::types::{ExitStatusInfo, StopSignal};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How long output still buffered in the pipes may drain after the process was reaped
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Launches real OS processes with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct OsBackend;

impl ProcessBackend for OsBackend {
    /// Spawn a process based on the provided spec
    ///
    /// The child gets the app's command line, working directory and environment overlay,
    /// a null stdin, and piped stdout/stderr that are pumped into the app's log files.
    /// It runs in its own process group so stop signals reach its descendants too.
    fn launch(&self, spec: &AppSpec) -> Result<SpawnedProcess> {
        let sink = LogSink::open(&spec.stdout_path(), &spec.stderr_path(), spec.date_format()?)?;

        let mut command = build_command(spec);
        let mut child = command.spawn().map_err(|e| {
            OverseerError::StartupFailure(
                spec.name.clone(),
                format!("Failed to spawn process: {}", e),
            )
        })?;

        let pid = child.id().ok_or_else(|| {
            OverseerError::StartupFailure(spec.name.clone(), "Failed to get PID".to_string())
        })?;

        let pumps = sink.attach(child.stdout.take(), child.stderr.take());
        let exited = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = oneshot::channel();

        let reaped = Arc::clone(&exited);
        let name = spec.name.clone();
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => exit_info(status),
                Err(e) => {
                    warn!("Failed to wait for {} (pid {}): {}", name, pid, e);
                    ExitStatusInfo::default()
                }
            };
            reaped.store(true, Ordering::SeqCst);

            pumps.finish(LOG_DRAIN_GRACE).await;
            debug!("Process {} (pid {}) reaped with {}", name, pid, info);

            let _ = exit_tx.send(info);
        });

        Ok(SpawnedProcess {
            pid,
            control: Box::new(OsControl { pid, exited }),
            exit: exit_rx,
        })
    }

    fn memory_sampler(&self) -> Box<dyn MemorySampler> {
        Box::new(SysinfoSampler::new())
    }
}

fn build_command(spec: &AppSpec) -> Command {
    let (program, args) = spec.command_line();
    let mut command = Command::new(program);

    if !args.is_empty() {
        command.args(&args);
    }

    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    // Overlay on top of the inherited environment
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    command
}

#[cfg(unix)]
fn exit_info(status: ExitStatus) -> ExitStatusInfo {
    use std::os::unix::process::ExitStatusExt;

    ExitStatusInfo {
        code: status.code(),
        signal: status.signal(),
    }
}

#[cfg(not(unix))]
fn exit_info(status: ExitStatus) -> ExitStatusInfo {
    ExitStatusInfo {
        code: status.code(),
        signal: None,
    }
}

/// Signals the process group led by `pid` until the leader has been reaped
struct OsControl {
    pid: u32,
    exited: Arc<AtomicBool>,
}

impl ProcessControl for OsControl {
    fn signal(&self, signal: StopSignal) -> Result<()> {
        self.send(signal)
    }

    fn kill(&self) -> Result<()> {
        self.send(StopSignal::Kill)
    }
}

impl OsControl {
    #[cfg(unix)]
    fn send(&self, signal: StopSignal) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        // The pid may already belong to someone else once reaped
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }

        match killpg(Pid::from_raw(self.pid as i32), to_nix_signal(signal)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(OverseerError::SignalError(format!(
                "Failed to send {} to process group {}: {}",
                signal, self.pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    fn send(&self, signal: StopSignal) -> Result<()> {
        Err(OverseerError::SignalError(format!(
            "Cannot send {} on this platform",
            signal
        )))
    }
}

#[cfg(unix)]
fn to_nix_signal(signal: StopSignal) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;

    match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Int => Signal::SIGINT,
        StopSignal::Quit => Signal::SIGQUIT,
        StopSignal::Hup => Signal::SIGHUP,
        StopSignal::Usr1 => Signal::SIGUSR1,
        StopSignal::Usr2 => Signal::SIGUSR2,
        StopSignal::Kill => Signal::SIGKILL,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_spec(dir: &TempDir, name: &str, script: &str) -> AppSpec {
        let mut spec = AppSpec::new(name, script);
        spec.out_file = Some(dir.path().join(format!("{}-out.log", name)));
        spec.error_file = Some(dir.path().join(format!("{}-error.log", name)));
        spec
    }

    #[tokio::test]
    async fn test_spawn_captures_output() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec(&temp_dir, "echo", "/bin/sh");
        spec.args = vec![
            "-c".to_string(),
            "echo hello; echo oops >&2; exit 3".to_string(),
        ];

        let spawned = OsBackend.launch(&spec).unwrap();
        assert!(spawned.pid > 0);

        let status = spawned.exit.await.unwrap();
        assert_eq!(status, ExitStatusInfo::code(3));

        let out = std::fs::read_to_string(spec.stdout_path()).unwrap();
        let err = std::fs::read_to_string(spec.stderr_path()).unwrap();
        assert!(out.trim_end().ends_with("] hello"));
        assert!(err.trim_end().ends_with("] oops"));
    }

    #[tokio::test]
    async fn test_spawn_with_env_and_cwd() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec(&temp_dir, "env", "/bin/sh");
        spec.args = vec!["-c".to_string(), "echo $OVERSEER_VAR; pwd".to_string()];
        spec.cwd = Some(temp_dir.path().to_path_buf());
        spec.env
            .insert("OVERSEER_VAR".to_string(), "from-overlay".to_string());

        let spawned = OsBackend.launch(&spec).unwrap();
        spawned.exit.await.unwrap();

        let out = std::fs::read_to_string(spec.stdout_path()).unwrap();
        let canonical = temp_dir.path().canonicalize().unwrap();
        assert!(out.contains("] from-overlay"));
        assert!(out.contains(&canonical.display().to_string()));
    }

    #[tokio::test]
    async fn test_spawn_with_interpreter() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("job.sh");
        std::fs::write(&script, "echo \"args: $1 $2\"\n").unwrap();

        let mut spec = create_test_spec(&temp_dir, "job", "");
        spec.script = script;
        spec.interpreter = Some("/bin/sh".to_string());
        spec.args = vec!["a".to_string(), "b".to_string()];

        let spawned = OsBackend.launch(&spec).unwrap();
        assert_eq!(spawned.exit.await.unwrap(), ExitStatusInfo::code(0));

        let out = std::fs::read_to_string(spec.stdout_path()).unwrap();
        assert!(out.contains("] args: a b"));
    }

    #[tokio::test]
    async fn test_signal_terminates_process() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec(&temp_dir, "sleeper", "/bin/sleep");
        spec.args = vec!["30".to_string()];

        let spawned = OsBackend.launch(&spec).unwrap();
        spawned.control.signal(StopSignal::Term).unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), spawned.exit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.signal, Some(15));
        assert_eq!(status.code, None);

        // Reaped: further signals are no-ops
        assert!(spawned.control.kill().is_ok());
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_script() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec(&temp_dir, "missing", "");
        spec.script = PathBuf::from("/nonexistent/script");

        match OsBackend.launch(&spec) {
            Err(OverseerError::StartupFailure(name, _)) => assert_eq!(name, "missing"),
            other => panic!("Expected StartupFailure, got {:?}", other),
        }
    }
}
