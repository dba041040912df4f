use crate::error::{OverseerError, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Why an app is parked in `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    NotStarted,
    ManualStop,
    Shutdown,
    AutorestartDisabled,
    RestartBudgetExhausted,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::NotStarted => write!(f, "not started"),
            StopCause::ManualStop => write!(f, "manual stop"),
            StopCause::Shutdown => write!(f, "shutdown"),
            StopCause::AutorestartDisabled => write!(f, "autorestart disabled"),
            StopCause::RestartBudgetExhausted => write!(f, "restart budget exhausted"),
        }
    }
}

/// Phase of the per-app lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Stopping,
    Exited,
    Restarting,
    Stopped(StopCause),
}

impl Phase {
    /// Whether the app has come to rest with no process and no pending action
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Stopped(_))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Starting => write!(f, "starting"),
            Phase::Running => write!(f, "running"),
            Phase::Stopping => write!(f, "stopping"),
            Phase::Exited => write!(f, "exited"),
            Phase::Restarting => write!(f, "restarting"),
            Phase::Stopped(cause) => write!(f, "stopped ({})", cause),
        }
    }
}

/// Why the last process instance went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Unsolicited exit while running
    Crash,
    MemoryBreach,
    StartupTimeout,
    StartupFailure,
    ScheduledTrigger,
    ManualRestart,
    ManualStop,
    ShutdownRequested,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Crash => write!(f, "crash"),
            ExitReason::MemoryBreach => write!(f, "memory breach"),
            ExitReason::StartupTimeout => write!(f, "startup timeout"),
            ExitReason::StartupFailure => write!(f, "startup failure"),
            ExitReason::ScheduledTrigger => write!(f, "scheduled restart"),
            ExitReason::ManualRestart => write!(f, "manual restart"),
            ExitReason::ManualStop => write!(f, "manual stop"),
            ExitReason::ShutdownRequested => write!(f, "shutdown"),
        }
    }
}

/// Origin of a restart request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    Manual,
    Scheduled,
}

impl RestartReason {
    pub fn exit_reason(self) -> ExitReason {
        match self {
            RestartReason::Manual => ExitReason::ManualRestart,
            RestartReason::Scheduled => ExitReason::ScheduledTrigger,
        }
    }
}

/// How a process terminated: exit code, or the signal that killed it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitStatusInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatusInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl fmt::Display for ExitStatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown"),
        }
    }
}

/// Signal used for graceful stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Term,
    Int,
    Quit,
    Hup,
    Usr1,
    Usr2,
    Kill,
}

impl StopSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopSignal::Term => "SIGTERM",
            StopSignal::Int => "SIGINT",
            StopSignal::Quit => "SIGQUIT",
            StopSignal::Hup => "SIGHUP",
            StopSignal::Usr1 => "SIGUSR1",
            StopSignal::Usr2 => "SIGUSR2",
            StopSignal::Kill => "SIGKILL",
        }
    }
}

impl FromStr for StopSignal {
    type Err = OverseerError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "TERM" => Ok(StopSignal::Term),
            "INT" => Ok(StopSignal::Int),
            "QUIT" => Ok(StopSignal::Quit),
            "HUP" => Ok(StopSignal::Hup),
            "USR1" => Ok(StopSignal::Usr1),
            "USR2" => Ok(StopSignal::Usr2),
            "KILL" => Ok(StopSignal::Kill),
            _ => Err(OverseerError::SignalError(format!("Unknown signal: {}", s))),
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one app's state, as published by its task
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub name: String,
    pub phase: Phase,
    /// Present only while a process exists
    pub pid: Option<u32>,
    pub started_at: Option<SystemTime>,
    pub consecutive_restarts: u32,
    /// Every restart performed since the supervisor was built
    pub total_restarts: u32,
    pub last_exit_reason: Option<ExitReason>,
    pub last_exit_status: Option<ExitStatusInfo>,
    /// Whether the last stop had to escalate to a kill
    pub killed_after_timeout: bool,
    pub memory_bytes: Option<u64>,
    pub next_scheduled_restart: Option<DateTime<Local>>,
}

impl AppState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: Phase::Stopped(StopCause::NotStarted),
            pid: None,
            started_at: None,
            consecutive_restarts: 0,
            total_restarts: 0,
            last_exit_reason: None,
            last_exit_status: None,
            killed_after_timeout: false,
            memory_bytes: None,
            next_scheduled_restart: None,
        }
    }

    /// Running time of the current process
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at
            .map(|started| SystemTime::now().duration_since(started).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stop_signal() {
        assert_eq!("SIGTERM".parse::<StopSignal>().unwrap(), StopSignal::Term);
        assert_eq!("int".parse::<StopSignal>().unwrap(), StopSignal::Int);
        assert_eq!("SIGUSR2".parse::<StopSignal>().unwrap(), StopSignal::Usr2);
        assert!("SIGFOO".parse::<StopSignal>().is_err());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Running.to_string(), "running");
        assert_eq!(
            Phase::Stopped(StopCause::RestartBudgetExhausted).to_string(),
            "stopped (restart budget exhausted)"
        );
        assert!(Phase::Stopped(StopCause::ManualStop).is_terminal());
        assert!(!Phase::Restarting.is_terminal());
    }

    #[test]
    fn test_new_state_not_started() {
        let state = AppState::new("worker");
        assert_eq!(state.phase, Phase::Stopped(StopCause::NotStarted));
        assert_eq!(state.pid, None);
        assert_eq!(state.consecutive_restarts, 0);
    }
}
