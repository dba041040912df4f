// Output formatting and display for CLI

use crate::config::{AppSpec, RejectedApp};
use crate::process::{AppState, ExitReason, Phase, StopCause};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of app states
pub fn print_status_table(states: &[AppState]) {
    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Last Exit")]
        last_exit: String,
        #[tabled(rename = "Next Restart")]
        next_restart: String,
    }

    if states.is_empty() {
        println!("{}", "No apps are configured".yellow());
        return;
    }

    let rows: Vec<StatusRow> = states
        .iter()
        .map(|s| StatusRow {
            name: truncate(&s.name, 24),
            state: format_phase_colored(&s.phase),
            pid: s
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            memory: s
                .memory_bytes
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string()),
            uptime: s
                .uptime()
                .map(|uptime| format_duration(&uptime))
                .unwrap_or_else(|| "-".to_string()),
            restarts: format!("{} ({})", s.total_restarts, s.consecutive_restarts),
            last_exit: format_last_exit(s),
            next_restart: s
                .next_scheduled_restart
                .map(|at| format_timestamp(&at))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!(
            "Total: {} app(s), {} running",
            states.len(),
            states.iter().filter(|s| s.phase == Phase::Running).count()
        )
        .dimmed()
        .italic()
    );
}

/// Print the validated app definitions of a configuration file
pub fn print_app_specs(specs: &[AppSpec]) {
    #[derive(Tabled)]
    struct SpecRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Memory Limit")]
        memory: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Cron")]
        cron: String,
        #[tabled(rename = "Next Restart")]
        next_restart: String,
    }

    let now = Local::now();
    let rows: Vec<SpecRow> = specs
        .iter()
        .map(|spec| {
            let (program, args) = spec.command_line();
            let command = std::iter::once(program.display().to_string())
                .chain(args)
                .collect::<Vec<_>>()
                .join(" ");

            let next_restart = spec
                .cron_schedule()
                .ok()
                .flatten()
                .and_then(|schedule| schedule.next_after(&now))
                .map(|at| format_timestamp(&at))
                .unwrap_or_else(|| "-".to_string());

            SpecRow {
                name: spec.name.cyan().to_string(),
                command: truncate(&command, 48),
                memory: spec
                    .max_memory_restart
                    .map(format_memory)
                    .unwrap_or_else(|| "-".to_string()),
                restarts: if spec.autorestart {
                    format!("max {}", spec.max_restarts)
                } else {
                    "off".to_string()
                },
                cron: spec.cron_restart.clone().unwrap_or_else(|| "-".to_string()),
                next_restart,
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Print the apps that were rejected at load time
pub fn print_rejected(rejected: &[RejectedApp]) {
    for app in rejected {
        eprintln!(
            "{} {} {}",
            "✗ Rejected".red().bold(),
            app.name.cyan(),
            format!("({})", app.reason).dimmed()
        );
    }
}

/// Print upcoming instants of a cron expression
pub fn print_cron_instants(expression: &str, instants: &[DateTime<Local>]) {
    println!("\n{} {}", "Schedule".bold().underline(), expression.cyan());
    println!();

    if instants.is_empty() {
        println!("{}", "No upcoming matches".yellow());
    }

    for (i, at) in instants.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, at.format("%a %Y-%m-%d %H:%M:%S %:z"));
    }

    println!();
}

/// Format a phase with color coding
fn format_phase_colored(phase: &Phase) -> String {
    match phase {
        Phase::Running => phase.to_string().green().to_string(),
        Phase::Starting | Phase::Restarting | Phase::Stopping | Phase::Exited => {
            phase.to_string().yellow().to_string()
        }
        Phase::Stopped(StopCause::RestartBudgetExhausted) => {
            phase.to_string().red().bold().to_string()
        }
        Phase::Stopped(_) => phase.to_string().bright_black().to_string(),
    }
}

fn format_last_exit(state: &AppState) -> String {
    let Some(reason) = state.last_exit_reason else {
        return "-".to_string();
    };

    let mut text = match state.last_exit_status {
        Some(status) => format!("{} ({})", reason, status),
        None => reason.to_string(),
    };
    if state.killed_after_timeout {
        text.push_str(", killed");
    }

    match reason {
        ExitReason::Crash | ExitReason::StartupFailure | ExitReason::StartupTimeout => {
            text.red().to_string()
        }
        ExitReason::MemoryBreach => text.yellow().to_string(),
        _ => text,
    }
}

fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Create a spinner for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
