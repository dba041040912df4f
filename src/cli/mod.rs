// CLI module - User-facing command-line interface

mod output;

use crate::config::load_apps;
use crate::cron::CronSchedule;
use crate::supervisor::Supervisor;
use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Overseer - supervises long-running worker processes
#[derive(Parser)]
#[command(name = "overseer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every app in a config file and supervise until SIGINT/SIGTERM
    Run {
        /// Path to a .toml or .json app list
        config: PathBuf,

        /// Seconds between status tables (0 disables them)
        #[arg(short, long, default_value = "60")]
        status_interval: u64,
    },

    /// Validate a config file and show the apps it defines
    Check {
        /// Path to a .toml or .json app list
        config: PathBuf,
    },

    /// Show the next instants matching a cron expression
    Cron {
        /// Cron expression, e.g. "0 */6 * * *"
        expression: String,

        /// Number of instants to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> anyhow::Result<()> {
        let cli = Cli::parse();
        init_tracing(cli.log_level.as_deref())?;
        cli.execute()
    }

    /// Execute the parsed command
    fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Run {
                config,
                status_interval,
            } => {
                let runtime =
                    tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
                runtime.block_on(run_apps(config, *status_interval))
            }
            Commands::Check { config } => check_config(config),
            Commands::Cron { expression, count } => show_cron(expression, *count),
        }
    }
}

fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run_apps(config: &Path, status_interval: u64) -> anyhow::Result<()> {
    let loaded = load_apps(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;

    let supervisor = Supervisor::from_config(loaded);
    output::print_rejected(supervisor.rejected());
    if supervisor.app_names().is_empty() {
        bail!("No valid apps in {}", config.display());
    }

    let pb = output::create_progress_bar("Starting apps...");
    let failures = supervisor.start_all().await;
    if failures.is_empty() {
        output::finish_progress_success(
            pb,
            &format!("Started {} app(s)", supervisor.app_names().len()),
        );
    } else {
        output::finish_progress_error(
            pb,
            &format!("{} app(s) failed to start", failures.len()),
        );
        for (name, error) in &failures {
            output::print_error(&format!("{}: {}", name, error));
        }
    }

    output::print_status_table(&supervisor.status_all());

    let mut shutdown = setup_signal_handlers()?;
    let period = Duration::from_secs(status_interval.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                let signal = signal.unwrap_or("shutdown");
                info!("Received {}", signal);
                break;
            }
            _ = ticker.tick(), if status_interval > 0 => {
                output::print_status_table(&supervisor.status_all());
            }
        }
    }

    let pb = output::create_progress_bar("Stopping apps...");
    let states = supervisor.shutdown().await;
    output::finish_progress_success(pb, "All apps stopped");
    output::print_status_table(&states);

    Ok(())
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
fn setup_signal_handlers() -> anyhow::Result<tokio::sync::oneshot::Receiver<&'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let (tx, rx) = tokio::sync::oneshot::channel();
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        let _ = tx.send(name);
    });

    Ok(rx)
}

#[cfg(not(unix))]
fn setup_signal_handlers() -> anyhow::Result<tokio::sync::oneshot::Receiver<&'static str>> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send("Ctrl-C");
        }
    });

    Ok(rx)
}

fn check_config(config: &Path) -> anyhow::Result<()> {
    let loaded = load_apps(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;

    output::print_info(&format!(
        "Logs default to {}",
        loaded.settings.log_dir.display()
    ));

    if !loaded.apps.is_empty() {
        output::print_app_specs(&loaded.apps);
    }
    output::print_rejected(&loaded.rejected);

    if !loaded.rejected.is_empty() {
        bail!("{} app(s) rejected", loaded.rejected.len());
    }

    output::print_success_msg(&format!("{} app(s) valid", loaded.apps.len()));
    Ok(())
}

fn show_cron(expression: &str, count: usize) -> anyhow::Result<()> {
    let schedule = CronSchedule::parse(expression)?;
    let instants = schedule.upcoming(&Local::now(), count);
    output::print_cron_instants(schedule.expression(), &instants);
    Ok(())
}
