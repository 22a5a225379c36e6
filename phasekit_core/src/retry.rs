//! Bounded retry policy with optional exponential backoff.
//!
//! The policy turns the outcome of a task's latest attempt into a
//! [`Decision`]: successes are done, fatal failures escalate immediately,
//! transient failures retry until the task's attempt budget is used up.

use crate::model::{Task, TaskAttempt};
use crate::types::AttemptOutcome;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do with a task after an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Dispatch the same task again
    Retry,
    /// Stop and require external intervention
    Escalate,
    /// Task succeeded
    Done,
}

/// Delay applied before re-dispatching a retried task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the second attempt
    pub initial_delay_ms: u64,
    /// Delay cap
    pub max_delay_ms: u64,
    /// Multiplier per additional attempt
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 30_000,
            factor: 2.0,
        }
    }
}

/// Retry policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Backoff between attempts
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl RetryPolicy {
    /// Creates a policy without backoff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Decides the fate of `task` given its latest attempt.
    ///
    /// An attempt without a recorded outcome counts as a transient failure.
    pub fn decide(&self, task: &Task, last_attempt: &TaskAttempt) -> Decision {
        match last_attempt.outcome {
            Some(AttemptOutcome::Success) => Decision::Done,
            Some(AttemptOutcome::FatalFailure) => Decision::Escalate,
            Some(AttemptOutcome::TransientFailure) | None => {
                if last_attempt.attempt_number < task.max_attempts {
                    Decision::Retry
                } else {
                    Decision::Escalate
                }
            }
        }
    }

    /// Returns the delay before dispatching `attempt_number` (1-based).
    ///
    /// The first attempt is never delayed.
    pub fn delay_before(&self, attempt_number: u32) -> Duration {
        if attempt_number <= 1 || self.backoff.initial_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt_number - 2) as i32;
        let millis = self.backoff.initial_delay_ms as f64 * self.backoff.factor.powi(exponent);
        let capped = millis.min(self.backoff.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}
