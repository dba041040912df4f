use crate::config::AppSpec;
use crate::cron::CronEvent;
use crate::error::{OverseerError, Result};
use crate::process::{
    decide, spawn_memory_monitor, AppState, Decision, ExitReason, ExitStatusInfo, MonitorEvent,
    Phase, ProcessBackend, ProcessControl, RestartPolicy, RestartReason, StopCause, StopSignal,
};
use chrono::{DateTime, Local};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Interval between readiness probes of `ready_address`
const READY_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Everything that can happen to an app, delivered to its task in order
pub(crate) enum AppEvent {
    Start {
        resp: oneshot::Sender<Result<()>>,
    },
    Stop {
        resp: oneshot::Sender<Result<()>>,
    },
    Restart {
        reason: RestartReason,
        resp: Option<oneshot::Sender<Result<()>>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
    Memory(MonitorEvent),
    NextSchedule(Option<DateTime<Local>>),
}

impl From<MonitorEvent> for AppEvent {
    fn from(event: MonitorEvent) -> Self {
        AppEvent::Memory(event)
    }
}

impl From<CronEvent> for AppEvent {
    fn from(event: CronEvent) -> Self {
        match event {
            CronEvent::Fired(_) => AppEvent::Restart {
                reason: RestartReason::Scheduled,
                resp: None,
            },
            CronEvent::Next(next) => AppEvent::NextSchedule(next),
        }
    }
}

/// One live process owned by the app task
struct Instance {
    pid: u32,
    control: Box<dyn ProcessControl>,
    exit: oneshot::Receiver<ExitStatusInfo>,
    started: Instant,
    /// Set once the process reached `Running`
    running_since: Option<Instant>,
    monitor: Option<JoinHandle<()>>,
}

impl Instance {
    /// Time spent in `Running`; zero for a process that never got there
    fn running_time(&self) -> Duration {
        self.running_since
            .map(|since| since.elapsed())
            .unwrap_or_default()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.abort();
        }
    }
}

/// Where the state machine goes next
enum Next {
    Launch,
    Ready(Instance),
    Stop(Instance, ExitReason),
    Exited {
        reason: ExitReason,
        status: Option<ExitStatusInfo>,
        /// Time the process spent in `Running`
        uptime: Duration,
    },
    Backoff(Duration),
    Park(StopCause),
    Quit,
}

/// The per-app task: sole owner of the app's [`AppState`]
pub(crate) struct AppRunner {
    spec: AppSpec,
    policy: RestartPolicy,
    stop_signal: StopSignal,
    ready_address: Option<SocketAddr>,
    memory_check_interval: Duration,
    backend: Arc<dyn ProcessBackend>,
    events: mpsc::UnboundedReceiver<AppEvent>,
    events_tx: mpsc::WeakUnboundedSender<AppEvent>,
    status: watch::Sender<AppState>,
    state: AppState,
    launch_waiters: Vec<oneshot::Sender<Result<()>>>,
    stop_waiters: Vec<oneshot::Sender<Result<()>>>,
    restart_waiters: Vec<oneshot::Sender<Result<()>>>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

/// Handles returned to the supervisor for one app
pub(crate) struct AppChannels {
    pub events: mpsc::UnboundedSender<AppEvent>,
    pub status: watch::Receiver<AppState>,
    pub task: JoinHandle<()>,
}

impl AppRunner {
    /// Validate `spec` and spawn its task, parked in `Stopped(NotStarted)`
    pub(crate) fn spawn(
        spec: AppSpec,
        memory_check_interval: Duration,
        backend: Arc<dyn ProcessBackend>,
    ) -> Result<AppChannels> {
        spec.validate()?;
        let stop_signal = spec.stop_signal()?;
        let ready_address = spec.ready_socket()?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let initial = AppState::new(spec.name.clone());
        let (status, status_rx) = watch::channel(initial.clone());

        let runner = AppRunner {
            policy: RestartPolicy::from_spec(&spec),
            spec,
            stop_signal,
            ready_address,
            memory_check_interval,
            backend,
            events,
            events_tx: events_tx.downgrade(),
            status,
            state: initial,
            launch_waiters: Vec::new(),
            stop_waiters: Vec::new(),
            restart_waiters: Vec::new(),
            shutdown_waiters: Vec::new(),
        };

        let task = tokio::spawn(runner.run());

        Ok(AppChannels {
            events: events_tx,
            status: status_rx,
            task,
        })
    }

    async fn run(mut self) {
        let mut next = Next::Park(StopCause::NotStarted);

        loop {
            next = match next {
                Next::Launch => self.launch().await,
                Next::Ready(instance) => self.supervise(instance).await,
                Next::Stop(instance, reason) => self.stop(instance, reason).await,
                Next::Exited {
                    reason,
                    status,
                    uptime,
                } => self.on_exit(reason, status, uptime),
                Next::Backoff(delay) => self.backoff(delay).await,
                Next::Park(cause) => self.park(cause).await,
                Next::Quit => break,
            };
        }

        for resp in self.shutdown_waiters.drain(..) {
            let _ = resp.send(());
        }
        debug!("App task for {} finished", self.spec.name);
    }

    fn publish(&self) {
        self.status.send_replace(self.state.clone());
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase != phase {
            debug!("{}: {} -> {}", self.spec.name, self.state.phase, phase);
        }
        self.state.phase = phase;
        self.publish();
    }

    fn record_next_schedule(&mut self, next: Option<DateTime<Local>>) {
        self.state.next_scheduled_restart = next;
        self.publish();
    }

    /// Starting: launch the process and wait for the readiness signal
    async fn launch(&mut self) -> Next {
        self.state.killed_after_timeout = false;
        self.state.memory_bytes = None;
        self.set_phase(Phase::Starting);

        let spawned = match self.backend.launch(&self.spec) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Failed to start {}: {}", self.spec.name, e);
                for resp in self.launch_waiters.drain(..) {
                    let _ = resp.send(Err(OverseerError::StartupFailure(
                        self.spec.name.clone(),
                        e.to_string(),
                    )));
                }
                return Next::Exited {
                    reason: ExitReason::StartupFailure,
                    status: None,
                    uptime: Duration::ZERO,
                };
            }
        };

        let mut instance = Instance {
            pid: spawned.pid,
            control: spawned.control,
            exit: spawned.exit,
            started: Instant::now(),
            running_since: None,
            monitor: None,
        };

        info!("Process {} started with PID {}", self.spec.name, instance.pid);
        self.state.pid = Some(instance.pid);
        self.state.started_at = Some(SystemTime::now());
        self.publish();

        for resp in self.launch_waiters.drain(..) {
            let _ = resp.send(Ok(()));
        }

        let Some(addr) = self.ready_address else {
            return Next::Ready(instance);
        };

        let deadline = instance.started + self.spec.listen_timeout;
        let probe = wait_until_listening(addr);
        tokio::pin!(probe);

        loop {
            tokio::select! {
                status = &mut instance.exit => {
                    let status = status.unwrap_or_default();
                    warn!(
                        "Process {} exited with {} before becoming ready",
                        self.spec.name, status
                    );
                    return Next::Exited {
                        reason: ExitReason::StartupFailure,
                        status: Some(status),
                        uptime: Duration::ZERO,
                    };
                }
                _ = &mut probe => {
                    debug!("{} is accepting connections on {}", self.spec.name, addr);
                    return Next::Ready(instance);
                }
                _ = sleep_until(deadline) => {
                    warn!(
                        "Process {} not ready on {} within {:?}, killing",
                        self.spec.name, addr, self.spec.listen_timeout
                    );
                    if let Err(e) = instance.control.kill() {
                        error!("Failed to kill {}: {}", self.spec.name, e);
                    }
                    let status = (&mut instance.exit).await.unwrap_or_default();
                    return Next::Exited {
                        reason: ExitReason::StartupTimeout,
                        status: Some(status),
                        uptime: Duration::ZERO,
                    };
                }
                event = self.events.recv() => {
                    if let Some(reason) = self.on_live_event(event, instance.pid) {
                        return Next::Stop(instance, reason);
                    }
                }
            }
        }
    }

    /// Running: wait for an exit or a reason to stop
    async fn supervise(&mut self, mut instance: Instance) -> Next {
        self.set_phase(Phase::Running);

        if let Some(ceiling) = self.spec.max_memory_restart {
            if let Some(events) = self.events_tx.upgrade() {
                instance.monitor = Some(spawn_memory_monitor(
                    instance.pid,
                    ceiling,
                    self.memory_check_interval,
                    self.backend.memory_sampler(),
                    events,
                ));
            }
        }

        let running_since = Instant::now();
        instance.running_since = Some(running_since);
        let stable_at = running_since + self.spec.min_uptime;
        let mut stable = false;

        loop {
            tokio::select! {
                status = &mut instance.exit => {
                    let status = status.unwrap_or_default();
                    warn!("Process {} exited unexpectedly with {}", self.spec.name, status);
                    return Next::Exited {
                        reason: ExitReason::Crash,
                        status: Some(status),
                        uptime: instance.running_time(),
                    };
                }
                _ = sleep_until(stable_at), if !stable => {
                    stable = true;
                    if self.state.consecutive_restarts > 0 {
                        debug!("{} reached min uptime, resetting restart counter", self.spec.name);
                        self.state.consecutive_restarts = 0;
                        self.publish();
                    }
                }
                event = self.events.recv() => {
                    if let Some(reason) = self.on_live_event(event, instance.pid) {
                        return Next::Stop(instance, reason);
                    }
                }
            }
        }
    }

    /// Events while a process is starting or running; returns a reason to stop it
    fn on_live_event(&mut self, event: Option<AppEvent>, pid: u32) -> Option<ExitReason> {
        match event {
            None => Some(ExitReason::ShutdownRequested),
            Some(AppEvent::Start { resp }) => {
                let _ = resp.send(Ok(()));
                None
            }
            Some(AppEvent::Stop { resp }) => {
                self.stop_waiters.push(resp);
                Some(ExitReason::ManualStop)
            }
            Some(AppEvent::Restart { reason, resp }) => {
                self.restart_waiters.extend(resp);
                Some(reason.exit_reason())
            }
            Some(AppEvent::Shutdown { resp }) => {
                self.shutdown_waiters.push(resp);
                Some(ExitReason::ShutdownRequested)
            }
            Some(AppEvent::Memory(MonitorEvent::Sampled { pid: sampled, bytes })) => {
                if sampled == pid {
                    self.state.memory_bytes = Some(bytes);
                    self.publish();
                }
                None
            }
            Some(AppEvent::Memory(MonitorEvent::Breach { pid: sampled, bytes })) => {
                if sampled != pid {
                    return None;
                }
                self.state.memory_bytes = Some(bytes);
                warn!(
                    "Process {} exceeded its memory ceiling ({} bytes), restarting",
                    self.spec.name, bytes
                );
                Some(ExitReason::MemoryBreach)
            }
            Some(AppEvent::NextSchedule(next)) => {
                self.record_next_schedule(next);
                None
            }
        }
    }

    /// Stopping: stop signal, then a kill once the shutdown timeout expires
    async fn stop(&mut self, mut instance: Instance, mut reason: ExitReason) -> Next {
        self.set_phase(Phase::Stopping);
        if let Some(monitor) = instance.monitor.take() {
            monitor.abort();
        }

        info!(
            "Stopping {} (PID {}) with {} for {}",
            self.spec.name, instance.pid, self.stop_signal, reason
        );

        let mut killed = false;
        if let Err(e) = instance.control.signal(self.stop_signal) {
            warn!("Failed to signal {}: {}, killing", self.spec.name, e);
            killed = true;
            if let Err(e) = instance.control.kill() {
                error!("Failed to kill {}: {}", self.spec.name, e);
            }
        }

        let deadline = Instant::now() + self.spec.kill_timeout;
        let mut events_open = true;
        let status = loop {
            tokio::select! {
                status = &mut instance.exit => break status.unwrap_or_default(),
                _ = sleep_until(deadline), if !killed => {
                    warn!(
                        "Shutdown timeout: {} still running after {:?}, killing",
                        self.spec.name, self.spec.kill_timeout
                    );
                    killed = true;
                    if let Err(e) = instance.control.kill() {
                        error!("Failed to kill {}: {}", self.spec.name, e);
                    }
                }
                event = self.events.recv(), if events_open => {
                    events_open = event.is_some();
                    reason = self.on_stopping_event(event, reason);
                }
            }
        };

        self.state.killed_after_timeout = killed;
        Next::Exited {
            reason,
            status: Some(status),
            uptime: instance.running_time(),
        }
    }

    /// Events while a stop is in flight; returns the updated exit reason
    fn on_stopping_event(&mut self, event: Option<AppEvent>, reason: ExitReason) -> ExitReason {
        let shutting_down = reason == ExitReason::ShutdownRequested;

        match event {
            None => ExitReason::ShutdownRequested,
            Some(AppEvent::Start { resp }) => {
                if shutting_down {
                    let _ = resp.send(Err(self.shutting_down_error()));
                    return reason;
                }
                let _ = resp.send(Ok(()));
                if reason == ExitReason::ManualStop {
                    ExitReason::ManualRestart
                } else {
                    reason
                }
            }
            Some(AppEvent::Stop { resp }) => {
                self.stop_waiters.push(resp);
                if shutting_down {
                    reason
                } else {
                    ExitReason::ManualStop
                }
            }
            Some(AppEvent::Restart {
                reason: RestartReason::Manual,
                resp,
            }) => {
                if shutting_down {
                    if let Some(resp) = resp {
                        let _ = resp.send(Err(self.shutting_down_error()));
                    }
                    return reason;
                }
                self.restart_waiters.extend(resp);
                if reason == ExitReason::ManualStop {
                    ExitReason::ManualRestart
                } else {
                    reason
                }
            }
            Some(AppEvent::Restart {
                reason: RestartReason::Scheduled,
                resp,
            }) => {
                // A restart already in flight covers it; a stop overrides it
                if let Some(resp) = resp {
                    let _ = resp.send(Ok(()));
                }
                reason
            }
            Some(AppEvent::Shutdown { resp }) => {
                self.shutdown_waiters.push(resp);
                ExitReason::ShutdownRequested
            }
            Some(AppEvent::Memory(_)) => reason,
            Some(AppEvent::NextSchedule(next)) => {
                self.record_next_schedule(next);
                reason
            }
        }
    }

    /// Exited: apply the uptime rule and consult the restart policy
    fn on_exit(
        &mut self,
        reason: ExitReason,
        status: Option<ExitStatusInfo>,
        uptime: Duration,
    ) -> Next {
        self.state.pid = None;
        self.state.started_at = None;
        self.state.memory_bytes = None;
        self.state.last_exit_reason = Some(reason);
        self.state.last_exit_status = status;

        if uptime >= self.spec.min_uptime && self.state.consecutive_restarts > 0 {
            debug!(
                "{} ran for {:?}, resetting restart counter",
                self.spec.name, uptime
            );
            self.state.consecutive_restarts = 0;
        }

        let verdict = decide(&self.policy, self.state.consecutive_restarts, reason);
        self.state.consecutive_restarts = verdict.consecutive_restarts;
        self.set_phase(Phase::Exited);

        let restarting = !matches!(verdict.decision, Decision::GiveUp(_));
        for resp in self.restart_waiters.drain(..) {
            let result = if restarting {
                Ok(())
            } else {
                Err(OverseerError::InvalidAppState(
                    self.spec.name.clone(),
                    "stopped before it could restart".to_string(),
                ))
            };
            let _ = resp.send(result);
        }

        match verdict.decision {
            Decision::RestartNow => {
                info!("Restarting {} after {}", self.spec.name, reason);
                self.state.total_restarts += 1;
                Next::Launch
            }
            Decision::RestartAfter(delay) => {
                info!(
                    "Restarting {} after {} (attempt {}/{}) in {:?}",
                    self.spec.name,
                    reason,
                    self.state.consecutive_restarts,
                    self.policy.max_restarts,
                    delay
                );
                self.state.total_restarts += 1;
                Next::Backoff(delay)
            }
            Decision::GiveUp(cause) => {
                if cause == StopCause::RestartBudgetExhausted {
                    error!(
                        "{} crashed {} times in a row, giving up",
                        self.spec.name, self.state.consecutive_restarts
                    );
                }
                Next::Park(cause)
            }
        }
    }

    /// Restarting: wait out the backoff unless told otherwise
    async fn backoff(&mut self, delay: Duration) -> Next {
        self.set_phase(Phase::Restarting);
        let deadline = Instant::now() + delay;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Next::Launch,
                event = self.events.recv() => match event {
                    None => return Next::Park(StopCause::Shutdown),
                    Some(AppEvent::Shutdown { resp }) => {
                        self.shutdown_waiters.push(resp);
                        return Next::Park(StopCause::Shutdown);
                    }
                    Some(AppEvent::Stop { resp }) => {
                        self.stop_waiters.push(resp);
                        info!("Abandoning pending restart of {}", self.spec.name);
                        return Next::Park(StopCause::ManualStop);
                    }
                    Some(AppEvent::Start { resp }) => {
                        let _ = resp.send(Ok(()));
                    }
                    Some(AppEvent::Restart { reason, resp }) => {
                        debug!("{} restart requested during backoff ({:?})", self.spec.name, reason);
                        self.state.consecutive_restarts = 0;
                        self.launch_waiters.extend(resp);
                        return Next::Launch;
                    }
                    Some(AppEvent::Memory(_)) => {}
                    Some(AppEvent::NextSchedule(next)) => self.record_next_schedule(next),
                },
            }
        }
    }

    /// Stopped: idle until started, restarted or shut down
    async fn park(&mut self, mut cause: StopCause) -> Next {
        self.state.pid = None;
        self.state.started_at = None;
        self.set_phase(Phase::Stopped(cause));
        if cause != StopCause::NotStarted {
            info!("{} stopped ({})", self.spec.name, cause);
        }

        for resp in self.stop_waiters.drain(..) {
            let _ = resp.send(Ok(()));
        }
        for resp in self.launch_waiters.drain(..) {
            let _ = resp.send(Err(OverseerError::InvalidAppState(
                self.spec.name.clone(),
                format!("stopped ({})", cause),
            )));
        }

        if cause == StopCause::Shutdown {
            return Next::Quit;
        }

        loop {
            match self.events.recv().await {
                None => return Next::Park(StopCause::Shutdown),
                Some(AppEvent::Shutdown { resp }) => {
                    self.shutdown_waiters.push(resp);
                    return Next::Park(StopCause::Shutdown);
                }
                Some(AppEvent::Start { resp }) => {
                    self.state.consecutive_restarts = 0;
                    self.launch_waiters.push(resp);
                    return Next::Launch;
                }
                Some(AppEvent::Stop { resp }) => {
                    if cause != StopCause::NotStarted && cause != StopCause::ManualStop {
                        cause = StopCause::ManualStop;
                        self.set_phase(Phase::Stopped(cause));
                    }
                    let _ = resp.send(Ok(()));
                }
                Some(AppEvent::Restart {
                    reason: RestartReason::Manual,
                    resp,
                }) => {
                    self.state.consecutive_restarts = 0;
                    self.launch_waiters.extend(resp);
                    return Next::Launch;
                }
                Some(AppEvent::Restart {
                    reason: RestartReason::Scheduled,
                    resp,
                }) => {
                    let honored = matches!(
                        cause,
                        StopCause::AutorestartDisabled | StopCause::RestartBudgetExhausted
                    );
                    if honored {
                        info!("Scheduled restart of stopped app {}", self.spec.name);
                        self.state.consecutive_restarts = 0;
                        self.state.total_restarts += 1;
                        self.launch_waiters.extend(resp);
                        return Next::Launch;
                    }
                    debug!("Ignoring scheduled restart of {} ({})", self.spec.name, cause);
                    if let Some(resp) = resp {
                        let _ = resp.send(Ok(()));
                    }
                }
                Some(AppEvent::Memory(_)) => {}
                Some(AppEvent::NextSchedule(next)) => self.record_next_schedule(next),
            }
        }
    }

    fn shutting_down_error(&self) -> OverseerError {
        OverseerError::InvalidAppState(self.spec.name.clone(), "shutting down".to_string())
    }
}

/// Resolves once `addr` accepts a TCP connection
async fn wait_until_listening(addr: SocketAddr) {
    loop {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        sleep(READY_PROBE_INTERVAL).await;
    }
}
