// Supervisor module - One state machine task per app

mod app;


use crate::config::{AppSpec, LoadedConfig, RejectedApp, SupervisorSettings};
use crate::cron::spawn_cron_task;
use crate::error::{OverseerError, Result};
use crate::process::{AppState, OsBackend, ProcessBackend, RestartReason};
use app::{AppEvent, AppRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct AppHandle {
    events: tokio::sync::mpsc::UnboundedSender<AppEvent>,
    status: watch::Receiver<AppState>,
    task: JoinHandle<()>,
    cron: Option<JoinHandle<()>>,
}

/// Supervises a fixed set of apps
///
/// Every app gets its own task that owns its state; the supervisor only sends it events
/// and reads the status it publishes. Must be created inside a tokio runtime.
pub struct Supervisor {
    apps: HashMap<String, AppHandle>,
    /// App names in configuration order
    order: Vec<String>,
    rejected: Vec<RejectedApp>,
}

impl Supervisor {
    /// Build a supervisor for `apps` running real OS processes
    pub fn new(apps: Vec<AppSpec>, settings: SupervisorSettings) -> Self {
        Self::with_backend(apps, settings, Arc::new(OsBackend))
    }

    /// Build a supervisor from a loaded configuration, keeping its rejected apps
    pub fn from_config(config: LoadedConfig) -> Self {
        let mut supervisor = Self::new(config.apps, config.settings);
        let mut rejected = config.rejected;
        rejected.append(&mut supervisor.rejected);
        supervisor.rejected = rejected;
        supervisor
    }

    /// Build a supervisor with a custom process backend
    ///
    /// Apps that fail validation (or reuse a name) are rejected individually and never
    /// started; the remaining apps are unaffected.
    pub fn with_backend(
        apps: Vec<AppSpec>,
        settings: SupervisorSettings,
        backend: Arc<dyn ProcessBackend>,
    ) -> Self {
        let mut supervisor = Self {
            apps: HashMap::with_capacity(apps.len()),
            order: Vec::with_capacity(apps.len()),
            rejected: Vec::new(),
        };

        for spec in apps {
            let name = spec.name.clone();

            if supervisor.apps.contains_key(&name) {
                supervisor.reject(name.clone(), format!("Duplicate app name: {}", name));
                continue;
            }

            let schedule = match spec.cron_schedule() {
                Ok(schedule) => schedule,
                Err(e) => {
                    supervisor.reject(name, e.to_string());
                    continue;
                }
            };

            match AppRunner::spawn(spec, settings.memory_check_interval, Arc::clone(&backend)) {
                Ok(channels) => {
                    let cron = schedule.map(|schedule| {
                        spawn_cron_task(name.clone(), schedule, channels.events.clone())
                    });
                    supervisor.order.push(name.clone());
                    supervisor.apps.insert(
                        name,
                        AppHandle {
                            events: channels.events,
                            status: channels.status,
                            task: channels.task,
                            cron,
                        },
                    );
                }
                Err(e) => supervisor.reject(name, e.to_string()),
            }
        }

        supervisor
    }

    fn reject(&mut self, name: String, reason: String) {
        warn!("Rejecting app {}: {}", name, reason);
        self.rejected.push(RejectedApp { name, reason });
    }

    fn handle(&self, name: &str) -> Result<&AppHandle> {
        self.apps
            .get(name)
            .ok_or_else(|| OverseerError::AppNotFound(name.to_string()))
    }

    fn send(&self, name: &str, event: AppEvent) -> Result<()> {
        self.handle(name)?
            .events
            .send(event)
            .map_err(|_| OverseerError::SupervisorGone(name.to_string()))
    }

    /// Apps that were rejected and will never run
    pub fn rejected(&self) -> &[RejectedApp] {
        &self.rejected
    }

    /// Names of the supervised apps, in configuration order
    pub fn app_names(&self) -> &[String] {
        &self.order
    }

    /// Start an app; succeeds immediately when it is already running
    pub async fn start(&self, name: &str) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.send(name, AppEvent::Start { resp })?;
        rx.await
            .map_err(|_| OverseerError::SupervisorGone(name.to_string()))?
    }

    /// Start every app, returning the failures
    pub async fn start_all(&self) -> Vec<(String, OverseerError)> {
        let mut pending = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let (resp, rx) = oneshot::channel();
            match self.send(name, AppEvent::Start { resp }) {
                Ok(()) => pending.push((name.clone(), rx)),
                Err(e) => error!("Failed to start {}: {}", name, e),
            }
        }

        let mut failures = Vec::new();
        for (name, rx) in pending {
            let result = rx
                .await
                .unwrap_or_else(|_| Err(OverseerError::SupervisorGone(name.clone())));
            if let Err(e) = result {
                failures.push((name, e));
            }
        }
        failures
    }

    /// Stop an app gracefully; resolves once it is `Stopped`
    pub async fn stop_gracefully(&self, name: &str) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.send(name, AppEvent::Stop { resp })?;
        rx.await
            .map_err(|_| OverseerError::SupervisorGone(name.to_string()))?
    }

    /// Restart an app
    ///
    /// Resolves once the old process is gone and the new one is on its way (or with an
    /// error if the app was stopped meanwhile).
    pub async fn request_restart(&self, name: &str, reason: RestartReason) -> Result<()> {
        let (resp, rx) = oneshot::channel();
        self.send(
            name,
            AppEvent::Restart {
                reason,
                resp: Some(resp),
            },
        )?;
        rx.await
            .map_err(|_| OverseerError::SupervisorGone(name.to_string()))?
    }

    /// Current state of one app
    pub fn status(&self, name: &str) -> Result<AppState> {
        Ok(self.handle(name)?.status.borrow().clone())
    }

    /// Current state of every app, in configuration order
    pub fn status_all(&self) -> Vec<AppState> {
        self.order
            .iter()
            .filter_map(|name| self.apps.get(name))
            .map(|handle| handle.status.borrow().clone())
            .collect()
    }

    /// Watch an app's state transitions
    pub fn subscribe(&self, name: &str) -> Result<watch::Receiver<AppState>> {
        Ok(self.handle(name)?.status.clone())
    }

    /// Stop every app concurrently and wait until all of them are terminal
    ///
    /// Each app is bounded by its own shutdown timeout.
    pub async fn shutdown(mut self) -> Vec<AppState> {
        info!("Shutting down {} app(s)", self.order.len());

        let mut pending = Vec::with_capacity(self.apps.len());
        for (name, handle) in &self.apps {
            let (resp, rx) = oneshot::channel();
            if handle.events.send(AppEvent::Shutdown { resp }).is_ok() {
                pending.push((name.clone(), rx));
            }
        }

        for (name, rx) in pending {
            if rx.await.is_err() {
                warn!("App task for {} ended before confirming shutdown", name);
            }
        }

        let states = self.status_all();

        for (name, handle) in self.apps.drain() {
            if let Some(cron) = handle.cron {
                cron.abort();
            }
            drop(handle.events);
            if let Err(e) = handle.task.await {
                error!("App task for {} failed: {}", name, e);
            }
        }

        info!("All apps stopped");
        states
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for handle in self.apps.values() {
            if let Some(cron) = &handle.cron {
                cron.abort();
            }
        }
    }
}
