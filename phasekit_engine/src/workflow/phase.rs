//! Drives one phase to completion.
//!
//! The runner is the only place that decides *what* runs next. Ready and
//! retry-queued tasks are submitted in creation order; each submission
//! occupies a pool lane for the whole attempt, including its retry
//! decision, so the number of running tasks never exceeds the pool capacity.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use phasekit_core::{ConcurrencyPool, Decision, RetryPolicy, TaskId};

use super::cancellation::CancellationToken;
use super::dispatcher::TaskDispatcher;
use super::ledger::LedgerHandle;
use crate::{EngineError, Result};

/// How a phase ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PhaseOutcome {
    /// Every task succeeded
    Completed,
    /// At least one task escalated
    Blocked,
    /// Cancellation stopped dispatch before the phase finished
    Cancelled,
}

struct LaneReport {
    task_id: TaskId,
    decision: Decision,
}

pub(crate) struct PhaseRunner {
    ledger: LedgerHandle,
    pool: ConcurrencyPool,
    dispatcher: Arc<TaskDispatcher>,
    policy: RetryPolicy,
    cancellation: CancellationToken,
    default_max_attempts: u32,
}

impl PhaseRunner {
    pub(crate) fn new(
        ledger: LedgerHandle,
        pool: ConcurrencyPool,
        dispatcher: Arc<TaskDispatcher>,
        policy: RetryPolicy,
        cancellation: CancellationToken,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            ledger,
            pool,
            dispatcher,
            policy,
            cancellation,
            default_max_attempts,
        }
    }

    /// Runs the phase at `index` until it completes, blocks or is cancelled.
    ///
    /// In-flight attempts always finish and are recorded before this returns.
    pub(crate) async fn run(&self, index: usize) -> Result<PhaseOutcome> {
        self.ledger.enter_phase(index, self.default_max_attempts).await?;
        let record = self.ledger.snapshot().await?;
        let phase = record.phase(index)?.name.clone();
        tracing::info!(
            "Phase '{}' active ({} tasks, {} lanes)",
            phase,
            record.tasks_in_phase(&phase).count(),
            self.pool.capacity()
        );

        let mut blocked = !record.escalated_tasks(&phase).is_empty();
        let mut failure: Option<EngineError> = None;
        let mut in_flight: HashSet<TaskId> = HashSet::new();
        let mut lanes = FuturesUnordered::new();

        loop {
            if !blocked && failure.is_none() && !self.cancellation.is_cancelled() {
                let record = self.ledger.snapshot().await?;
                let candidates: Vec<_> = record
                    .dispatchable_tasks(&phase)
                    .into_iter()
                    .filter(|t| !in_flight.contains(&t.id))
                    .collect();

                for task in candidates {
                    let next_attempt = record.attempts_used(&task.id) + 1;
                    let lane = self.lane(task.id.clone(), next_attempt);
                    let handle = tokio::select! {
                        biased;
                        _ = self.cancellation.cancelled() => break,
                        submitted = self.pool.submit(lane) => submitted?,
                    };
                    in_flight.insert(task.id);
                    lanes.push(handle);
                }
            }

            let Some(joined) = lanes.next().await else {
                break;
            };
            let report = match joined.map_err(EngineError::from).and_then(|lane| lane) {
                Ok(report) => report,
                Err(e) => {
                    // Keep draining so no lane outlives the phase.
                    tracing::error!("Lane failed in phase '{}': {}", phase, e);
                    failure.get_or_insert(e);
                    continue;
                }
            };
            in_flight.remove(&report.task_id);

            if report.decision == Decision::Escalate && !blocked {
                tracing::warn!(
                    "Task {} escalated; phase '{}' stops dispatching",
                    report.task_id,
                    phase
                );
                blocked = true;
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let record = self.ledger.snapshot().await?;
        if !record.escalated_tasks(&phase).is_empty() {
            self.ledger.block_phase(index).await?;
            tracing::warn!("Phase '{}' blocked", phase);
            return Ok(PhaseOutcome::Blocked);
        }
        if record.phase_succeeded(index)? {
            self.ledger.complete_phase(index).await?;
            tracing::info!("Phase '{}' completed", phase);
            return Ok(PhaseOutcome::Completed);
        }
        if self.cancellation.is_cancelled() {
            tracing::info!("Phase '{}' cancelled", phase);
            return Ok(PhaseOutcome::Cancelled);
        }
        Err(EngineError::Stalled(phase))
    }

    /// One attempt of one task: backoff, dispatch, retry decision.
    fn lane(
        &self,
        task_id: TaskId,
        attempt_number: u32,
    ) -> impl Future<Output = Result<LaneReport>> + Send + 'static {
        let dispatcher = self.dispatcher.clone();
        let ledger = self.ledger.clone();
        let policy = self.policy.clone();

        async move {
            let delay = policy.delay_before(attempt_number);
            if !delay.is_zero() {
                tracing::debug!("Backing off {:?} before retrying task {}", delay, task_id);
                tokio::time::sleep(delay).await;
            }

            let (task, attempt) = dispatcher.dispatch(&task_id).await?;
            let decision = policy.decide(&task, &attempt);
            ledger.resolve(task_id.clone(), decision).await?;
            Ok(LaneReport { task_id, decision })
        }
    }
}
