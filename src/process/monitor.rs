use crate::process::backend::MemorySampler;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Resident memory sampler backed by sysinfo
pub struct SysinfoSampler {
    /// System information collector
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn resident_memory(&mut self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);

        // Refresh only this process, and only its memory
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        self.system.process(sys_pid).map(|process| process.memory())
    }
}

/// Whether a sample breaches the ceiling; a sample equal to the ceiling does not
pub fn exceeds_ceiling(ceiling: u64, sample: u64) -> bool {
    sample > ceiling
}

/// What the memory monitor reports to the app it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Sampled { pid: u32, bytes: u64 },
    Breach { pid: u32, bytes: u64 },
}

/// Sample `pid` every `interval` until it breaches `ceiling` or disappears
///
/// # Arguments
/// * `pid` - Process to watch
/// * `ceiling` - Resident memory limit in bytes
/// * `interval` - Time between samples (the first sample is taken after one interval)
/// * `sampler` - Memory source
/// * `events` - The app's event queue; the monitor stops when it is closed
pub fn spawn_memory_monitor<E>(
    pid: u32,
    ceiling: u64,
    interval: Duration,
    mut sampler: Box<dyn MemorySampler>,
    events: mpsc::UnboundedSender<E>,
) -> JoinHandle<()>
where
    E: From<MonitorEvent> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(bytes) = sampler.resident_memory(pid) else {
                debug!("Process {} is gone, memory monitor stopping", pid);
                break;
            };

            if exceeds_ceiling(ceiling, bytes) {
                warn!(
                    "Process {} uses {} bytes, above its ceiling of {} bytes",
                    pid, bytes, ceiling
                );
                let _ = events.send(MonitorEvent::Breach { pid, bytes }.into());
                break;
            }

            if events.send(MonitorEvent::Sampled { pid, bytes }.into()).is_err() {
                break;
            }
        }
    })
}
