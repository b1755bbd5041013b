//! Backoff policies and the per-task retry state machine.
//!
//! # Backoff Strategy
//!
//! The delay before retry number `n` (1-based) follows:
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=jitter)
//! ```
//!
//! # Task lifecycle
//!
//! ```text
//! Pending ──▶ Attempting(n) ──▶ Succeeded
//!                 │   ▲    ├──▶ Failed
//!                 │   │    └──▶ Skipped
//!                 ▼   │
//!          Retrying(n, next_deadline)
//! ```
//!
//! The scheduler drives transitions; the machine itself never sleeps, so the
//! decisions are testable with any clock.

use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use std::time::Duration;

use crate::clock::to_chrono;
use crate::error::FetchError;

/// Exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry (doubles with each attempt).
    pub base_delay: Duration,
    /// Cap for the exponential part.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Policy for listing fetches: 1s, 2s, 4s ... capped at 30s, with up to 250ms jitter.
    pub fn fetch(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }

    /// Policy for store calls, deliberately shorter than the fetch policy.
    pub fn store() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(50),
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << shift).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
    }
}

/// Lifecycle of one crawl task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Attempting {
        attempt: u32,
    },
    Retrying {
        attempt: u32,
        next_deadline: DateTime<Utc>,
    },
    Succeeded {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: String,
    },
    Skipped {
        attempts: u32,
        reason: String,
    },
}

impl TaskState {
    /// Start the next attempt. Terminal and in-flight states are left unchanged.
    pub fn begin_attempt(self) -> Self {
        match self {
            TaskState::Pending => TaskState::Attempting { attempt: 1 },
            TaskState::Retrying { attempt, .. } => TaskState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// React to a failed fetch: schedule a retry or give up.
    pub fn fetch_failed(self, error: &FetchError, policy: &RetryPolicy, now: DateTime<Utc>) -> Self {
        match self {
            TaskState::Attempting { attempt } => {
                if error.is_transient() && attempt <= policy.max_retries {
                    TaskState::Retrying {
                        attempt,
                        next_deadline: now + to_chrono(policy.delay_for(attempt)),
                    }
                } else {
                    TaskState::Failed {
                        attempts: attempt,
                        reason: error.to_string(),
                    }
                }
            }
            other => other,
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            TaskState::Attempting { attempt } => TaskState::Succeeded { attempts: attempt },
            other => other,
        }
    }

    pub fn fail(self, reason: impl Into<String>) -> Self {
        match self {
            TaskState::Attempting { attempt } => TaskState::Failed {
                attempts: attempt,
                reason: reason.into(),
            },
            other => other,
        }
    }

    /// Skip from any non-terminal state (a pending task skipped by a stop has 0 attempts).
    pub fn skip(self, reason: impl Into<String>) -> Self {
        let attempts = self.attempts();
        match self {
            TaskState::Pending | TaskState::Attempting { .. } | TaskState::Retrying { .. } => {
                TaskState::Skipped {
                    attempts,
                    reason: reason.into(),
                }
            }
            other => other,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            TaskState::Pending => 0,
            TaskState::Attempting { attempt } | TaskState::Retrying { attempt, .. } => *attempt,
            TaskState::Succeeded { attempts }
            | TaskState::Failed { attempts, .. }
            | TaskState::Skipped { attempts, .. } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded { .. } | TaskState::Failed { .. } | TaskState::Skipped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn transient() -> FetchError {
        FetchError::Transient {
            url: "http://x".into(),
            reason: "HTTP 503".into(),
        }
    }

    fn permanent() -> FetchError {
        FetchError::Permanent {
            url: "http://x".into(),
            reason: "HTTP 404".into(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy::fetch(3);
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_transient_failures_retry_until_exhausted() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::fetch(2)
        };

        let state = TaskState::Pending.begin_attempt();
        assert_eq!(state, TaskState::Attempting { attempt: 1 });

        let state = state.fetch_failed(&transient(), &policy, now());
        assert_eq!(
            state,
            TaskState::Retrying {
                attempt: 1,
                next_deadline: now() + chrono::Duration::seconds(1)
            }
        );

        let state = state
            .begin_attempt()
            .fetch_failed(&transient(), &policy, now());
        assert!(matches!(state, TaskState::Retrying { attempt: 2, .. }));

        let state = state
            .begin_attempt()
            .fetch_failed(&transient(), &policy, now());
        assert!(matches!(state, TaskState::Failed { attempts: 3, .. }));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let state = TaskState::Pending
            .begin_attempt()
            .fetch_failed(&permanent(), &RetryPolicy::fetch(5), now());
        assert!(matches!(state, TaskState::Failed { attempts: 1, .. }));
    }

    #[test]
    fn test_skip_keeps_attempt_count() {
        assert_eq!(
            TaskState::Pending.skip("stopped"),
            TaskState::Skipped {
                attempts: 0,
                reason: "stopped".into()
            }
        );
        let parsed = TaskState::Pending.begin_attempt().skip("parse");
        assert_eq!(parsed.attempts(), 1);
        // Terminal states do not move.
        let done = TaskState::Succeeded { attempts: 2 };
        assert_eq!(done.clone().skip("late"), done);
    }
}
