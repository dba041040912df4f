// Cron module - Wall-clock restart schedules

use crate::error::{OverseerError, Result};
use chrono::{DateTime, Local, TimeZone};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Longest the scheduler sleeps before re-reading the wall clock
const MAX_TICK: Duration = Duration::from_secs(1);

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A parsed cron expression
///
/// Accepts the standard five-field form (`minute hour day-of-month month day-of-week`,
/// with `0` and `7` both meaning Sunday), the six/seven-field form with seconds, and
/// `@hourly`-style aliases.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let normalized = normalize_expression(expression)?;
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            OverseerError::SchedulingError(expression.to_string(), e.to_string())
        })?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as written in the configuration
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First matching instant strictly after `reference`
    pub fn next_after<Tz: TimeZone>(&self, reference: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(reference).next()
    }

    /// The next `count` matching instants strictly after `reference`
    pub fn upcoming<Tz: TimeZone>(
        &self,
        reference: &DateTime<Tz>,
        count: usize,
    ) -> Vec<DateTime<Tz>> {
        self.schedule.after(reference).take(count).collect()
    }
}

/// Rewrite a five-field expression into the seconds-first dialect of the `cron` crate.
///
/// That crate numbers weekdays 1-7 starting at Sunday, so numeric day-of-week values are
/// spelled out as names.
fn normalize_expression(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = normalize_day_of_week(fields[4])
                .map_err(|e| OverseerError::SchedulingError(expression.to_string(), e))?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(OverseerError::SchedulingError(
            expression.to_string(),
            format!("expected 5 fields, found {}", n),
        )),
    }
}

fn normalize_day_of_week(field: &str) -> std::result::Result<String, String> {
    let mut parts = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}'", step))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        if range == "*" || range == "?" || !range.chars().any(|c| c.is_ascii_digit()) {
            parts.push(item.to_string());
            continue;
        }

        let suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

        match range.split_once('-') {
            Some((start, end)) => {
                let start = weekday_number(start)?;
                let end = weekday_number(end)?;
                if end == 7 {
                    // 7 is Sunday again; the crate cannot wrap past Saturday
                    parts.push(format!("{}-Sat{}", WEEKDAY_NAMES[start as usize], suffix));
                    let hits_seven = step.map(|s| (7 - start) % s == 0).unwrap_or(true);
                    if hits_seven && start != 0 {
                        parts.push("Sun".to_string());
                    }
                } else {
                    parts.push(format!(
                        "{}-{}{}",
                        WEEKDAY_NAMES[start as usize], WEEKDAY_NAMES[end as usize], suffix
                    ));
                }
            }
            None => {
                let day = weekday_number(range)? % 7;
                parts.push(format!("{}{}", WEEKDAY_NAMES[day as usize], suffix));
            }
        }
    }

    Ok(parts.join(","))
}

fn weekday_number(value: &str) -> std::result::Result<u32, String> {
    match value.parse::<u32>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(format!("invalid day of week '{}'", value)),
    }
}

/// Edge-triggered evaluation of a schedule against a possibly jumping wall clock.
///
/// The ticker remembers the instant it is waiting for and the last instant it fired.
/// It fires at most once per matching instant, never for an instant at or before the
/// last one fired, and never bursts to catch up after the clock jumps forward.
#[derive(Debug, Clone)]
pub struct CronTicker<Tz: TimeZone> {
    schedule: CronSchedule,
    pending: Option<DateTime<Tz>>,
    last_fired: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> CronTicker<Tz> {
    pub fn new(schedule: CronSchedule) -> Self {
        Self {
            schedule,
            pending: None,
            last_fired: None,
        }
    }

    /// The instant the ticker is currently waiting for
    pub fn pending(&self) -> Option<&DateTime<Tz>> {
        self.pending.as_ref()
    }

    /// Observe the wall clock; returns the scheduled instant if one fired.
    pub fn tick(&mut self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let mut fired = None;

        if let Some(target) = self.pending.take() {
            let already_fired = self
                .last_fired
                .as_ref()
                .map(|last| target <= *last)
                .unwrap_or(false);
            if *now >= target && !already_fired {
                self.last_fired = Some(target.clone());
                fired = Some(target);
            }
        }

        // After a backward jump, instants up to the last fired one stay excluded
        let reference = match &self.last_fired {
            Some(last) if last > now => last.clone(),
            _ => now.clone(),
        };
        self.pending = self.schedule.next_after(&reference);

        fired
    }
}

/// What the scheduler task reports to the app it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronEvent {
    /// A scheduled instant was reached
    Fired(DateTime<Local>),
    /// The next instant the scheduler is waiting for
    Next(Option<DateTime<Local>>),
}

/// Run `schedule` against local wall-clock time, reporting to `events`.
///
/// The task ends when the receiving side is dropped.
pub fn spawn_cron_task<E>(
    app: String,
    schedule: CronSchedule,
    events: mpsc::UnboundedSender<E>,
) -> JoinHandle<()>
where
    E: From<CronEvent> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker: CronTicker<Local> = CronTicker::new(schedule);
        let mut announced: Option<DateTime<Local>> = None;

        loop {
            let now = Local::now();

            if let Some(at) = ticker.tick(&now) {
                info!("Scheduled restart of {} due at {}", app, at);
                if events.send(CronEvent::Fired(at).into()).is_err() {
                    break;
                }
            }

            let next = ticker.pending().cloned();
            if next != announced {
                debug!("Next scheduled restart of {}: {:?}", app, next);
                if events.send(CronEvent::Next(next).into()).is_err() {
                    break;
                }
                announced = next;
            }

            let wait = next
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or(MAX_TICK)
                .min(MAX_TICK);
            tokio::time::sleep(wait).await;
        }

        debug!("Cron task for {} finished", app);
    })
}
