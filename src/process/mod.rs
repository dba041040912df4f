// Process module - OS processes, restart policy and resource sampling

mod backend;
pub mod monitor;
pub mod restart;
mod spawner;
pub mod types;

pub use backend::{MemorySampler, ProcessBackend, ProcessControl, SpawnedProcess};
pub use monitor::{exceeds_ceiling, spawn_memory_monitor, MonitorEvent, SysinfoSampler};
pub use restart::{decide, BackoffStrategy, Decision, RestartPolicy, RestartVerdict};
pub use spawner::OsBackend;
pub use types::{
    AppState, ExitReason, ExitStatusInfo, Phase, RestartReason, StopCause, StopSignal,
};

#[cfg(test)]
pub(crate) use backend::fake;
