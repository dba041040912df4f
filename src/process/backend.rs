use crate::config::AppSpec;
use crate::error::Result;
use crate::process::types::{ExitStatusInfo, StopSignal};
use tokio::sync::oneshot;

/// Launches processes for the supervisor.
///
/// The OS implementation lives in [`crate::process::OsBackend`]; tests drive the
/// state machine with an in-memory fake instead.
pub trait ProcessBackend: Send + Sync + 'static {
    /// Start one instance of `spec`, with its output already attached to the log files
    fn launch(&self, spec: &AppSpec) -> Result<SpawnedProcess>;

    /// A sampler for resident memory of processes started by this backend
    fn memory_sampler(&self) -> Box<dyn MemorySampler>;
}

/// Signal delivery to one running process
pub trait ProcessControl: Send + Sync {
    fn signal(&self, signal: StopSignal) -> Result<()>;

    fn kill(&self) -> Result<()>;
}

/// Resident memory lookups by pid
pub trait MemorySampler: Send {
    /// Current resident memory in bytes, or `None` once the process is gone
    fn resident_memory(&mut self, pid: u32) -> Option<u64>;
}

/// A freshly launched process
pub struct SpawnedProcess {
    /// Process ID assigned by the OS
    pub pid: u32,

    pub control: Box<dyn ProcessControl>,

    /// Resolves once the process has been reaped and its logs are flushed
    pub exit: oneshot::Receiver<ExitStatusInfo>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}
