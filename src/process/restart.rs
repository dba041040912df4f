use crate::config::AppSpec;
use crate::process::types::{ExitReason, StopCause};
use std::time::Duration;

/// Upper bound for exponential restart delays
pub const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// Restart policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Whether automatic restart is enabled
    pub enabled: bool,
    /// Maximum number of consecutive crash restarts
    pub max_restarts: u32,
    /// Backoff strategy to use
    pub backoff: BackoffStrategy,
}

impl RestartPolicy {
    pub fn from_spec(spec: &AppSpec) -> Self {
        let backoff = match spec.exp_backoff_restart_delay {
            Some(initial) => BackoffStrategy::Exponential {
                initial,
                max: MAX_BACKOFF,
            },
            None => BackoffStrategy::Fixed(spec.restart_delay),
        };

        Self {
            enabled: spec.autorestart,
            max_restarts: spec.max_restarts,
            backoff,
        }
    }
}

/// Backoff strategy for restart delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between restarts
    Fixed(Duration),
    /// Doubling delay per consecutive restart, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay before restart number `attempt` (1-based) of the current crash streak
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                initial
                    .checked_mul(1u32 << exponent)
                    .unwrap_or(*max)
                    .min(*max)
            }
        }
    }
}

/// What to do after an exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    RestartNow,
    RestartAfter(Duration),
    GiveUp(StopCause),
}

/// A decision together with the new consecutive-restart counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartVerdict {
    pub decision: Decision,
    pub consecutive_restarts: u32,
}

/// Decide how to react to an exit.
///
/// # Arguments
/// * `policy` - The app's restart policy
/// * `consecutive_restarts` - Counter value before this exit (after any uptime reset)
/// * `reason` - Why the process went away
pub fn decide(policy: &RestartPolicy, consecutive_restarts: u32, reason: ExitReason) -> RestartVerdict {
    let verdict = |decision, consecutive_restarts| RestartVerdict {
        decision,
        consecutive_restarts,
    };

    match reason {
        ExitReason::ManualStop => verdict(
            Decision::GiveUp(StopCause::ManualStop),
            consecutive_restarts,
        ),
        ExitReason::ShutdownRequested => {
            verdict(Decision::GiveUp(StopCause::Shutdown), consecutive_restarts)
        }
        ExitReason::ManualRestart => verdict(Decision::RestartNow, 0),
        ExitReason::ScheduledTrigger => verdict(Decision::RestartAfter(Duration::ZERO), 0),
        ExitReason::Crash
        | ExitReason::MemoryBreach
        | ExitReason::StartupTimeout
        | ExitReason::StartupFailure => {
            if !policy.enabled {
                return verdict(
                    Decision::GiveUp(StopCause::AutorestartDisabled),
                    consecutive_restarts,
                );
            }

            let next = consecutive_restarts.saturating_add(1);
            if next > policy.max_restarts {
                verdict(Decision::GiveUp(StopCause::RestartBudgetExhausted), next)
            } else {
                verdict(
                    Decision::RestartAfter(policy.backoff.calculate_delay(next)),
                    next,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            enabled: true,
            max_restarts,
            backoff: BackoffStrategy::Fixed(Duration::ZERO),
        }
    }

    #[test]
    fn test_policy_from_spec() {
        let mut spec = AppSpec::new("test", "/bin/true");
        spec.max_restarts = 10;
        spec.restart_delay = Duration::from_millis(500);

        let policy = RestartPolicy::from_spec(&spec);
        assert!(policy.enabled);
        assert_eq!(policy.max_restarts, 10);
        assert_eq!(
            policy.backoff,
            BackoffStrategy::Fixed(Duration::from_millis(500))
        );

        spec.exp_backoff_restart_delay = Some(Duration::from_millis(100));
        assert_eq!(
            RestartPolicy::from_spec(&spec).backoff,
            BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                max: MAX_BACKOFF
            }
        );
    }

    #[test]
    fn test_backoff_fixed() {
        let strategy = BackoffStrategy::Fixed(Duration::from_secs(5));
        assert_eq!(strategy.calculate_delay(1), Duration::from_secs(5));
        assert_eq!(strategy.calculate_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_exponential() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: MAX_BACKOFF,
        };

        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(4), Duration::from_millis(800));
        // 100ms * 2^8 = 25.6s, capped
        assert_eq!(strategy.calculate_delay(9), MAX_BACKOFF);
        assert_eq!(strategy.calculate_delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_crash_increments_until_budget_exhausted() {
        let policy = policy(3);
        let mut counter = 0;

        for expected in 1..=3 {
            let verdict = decide(&policy, counter, ExitReason::Crash);
            assert_eq!(verdict.decision, Decision::RestartAfter(Duration::ZERO));
            assert_eq!(verdict.consecutive_restarts, expected);
            counter = verdict.consecutive_restarts;
        }

        let verdict = decide(&policy, counter, ExitReason::Crash);
        assert_eq!(
            verdict.decision,
            Decision::GiveUp(StopCause::RestartBudgetExhausted)
        );
    }

    #[test]
    fn test_zero_budget_gives_up_immediately() {
        let verdict = decide(&policy(0), 0, ExitReason::StartupFailure);
        assert_eq!(
            verdict.decision,
            Decision::GiveUp(StopCause::RestartBudgetExhausted)
        );
    }

    #[test]
    fn test_scheduled_trigger_resets_at_limit() {
        let verdict = decide(&policy(3), 3, ExitReason::ScheduledTrigger);
        assert_eq!(verdict.decision, Decision::RestartAfter(Duration::ZERO));
        assert_eq!(verdict.consecutive_restarts, 0);
    }

    #[test]
    fn test_manual_restart_always_permitted() {
        let mut disabled = policy(0);
        disabled.enabled = false;

        let verdict = decide(&disabled, 7, ExitReason::ManualRestart);
        assert_eq!(verdict.decision, Decision::RestartNow);
        assert_eq!(verdict.consecutive_restarts, 0);
    }

    #[test]
    fn test_autorestart_disabled() {
        let mut disabled = policy(5);
        disabled.enabled = false;

        for reason in [
            ExitReason::Crash,
            ExitReason::MemoryBreach,
            ExitReason::StartupTimeout,
        ] {
            assert_eq!(
                decide(&disabled, 0, reason).decision,
                Decision::GiveUp(StopCause::AutorestartDisabled)
            );
        }
    }

    #[test]
    fn test_stop_and_shutdown_give_up() {
        let policy = policy(5);
        assert_eq!(
            decide(&policy, 2, ExitReason::ManualStop).decision,
            Decision::GiveUp(StopCause::ManualStop)
        );
        assert_eq!(
            decide(&policy, 2, ExitReason::ShutdownRequested).decision,
            Decision::GiveUp(StopCause::Shutdown)
        );
    }

    #[test]
    fn test_memory_breach_uses_backoff() {
        let policy = RestartPolicy {
            enabled: true,
            max_restarts: 10,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_secs(1),
                max: MAX_BACKOFF,
            },
        };

        let verdict = decide(&policy, 2, ExitReason::MemoryBreach);
        assert_eq!(verdict.consecutive_restarts, 3);
        assert_eq!(verdict.decision, Decision::RestartAfter(Duration::from_secs(4)));
    }
}
