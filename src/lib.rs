// Library exports for the Overseer process supervisor

pub mod cli;
pub mod config;
pub mod cron;
pub mod error;
pub mod logs;
pub mod process;
pub mod supervisor;

pub use config::{load_apps, AppSpec, LoadedConfig, RejectedApp, SupervisorSettings};
pub use error::{OverseerError, Result};
pub use process::{AppState, ExitReason, Phase, RestartReason, StopCause};
pub use supervisor::Supervisor;
