//! Run data model and its state machine.
//!
//! [`RunRecord`] bundles everything persisted for one run: the caller's
//! specification, the [`WorkflowRun`] with its phases, the tasks created so
//! far and the full attempt history. All status changes go through the
//! transition methods on `RunRecord`, which enforce the forward-only task
//! state machine and strict phase sequencing.

use crate::dag::PhaseGraph;
use crate::error::{PhaseKitError, Result};
use crate::spec::{RunSpec, DEFAULT_MAX_ATTEMPTS};
use crate::types::{
    AttemptOutcome, ComplexityClass, PhaseStatus, RunId, RunStatus, TaskId, TaskStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One end-to-end execution of a run specification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique run identifier
    pub id: RunId,
    /// Phases in declared order
    pub phases: Vec<Phase>,
    /// Index of the phase currently being driven
    pub current_phase_index: usize,
    /// Run status
    pub status: RunStatus,
    /// True when the run was stopped by a cancellation signal
    #[serde(default)]
    pub cancelled: bool,
    /// Reason for a failed run
    #[serde(default)]
    pub failure: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last persisted transition
    pub updated_at: DateTime<Utc>,
}

/// A named, ordered stage of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name
    pub name: String,
    /// Ids of the tasks belonging to this phase, in creation order
    pub tasks: Vec<TaskId>,
    /// Phase status
    pub status: PhaseStatus,
}

/// Unit of dispatchable work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Owning phase
    pub phase_name: String,
    /// Same-phase prerequisites
    pub depends_on: Vec<TaskId>,
    /// Worker tier
    pub complexity_class: ComplexityClass,
    /// Attempt budget
    pub max_attempts: u32,
    /// Task status
    pub status: TaskStatus,
    /// Opaque collaborator input
    #[serde(default)]
    pub payload: Value,
}

/// One execution record of a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskAttempt {
    /// Task this attempt belongs to
    pub task_id: TaskId,
    /// 1-based attempt number
    pub attempt_number: u32,
    /// When the attempt was dispatched
    pub started_at: DateTime<Utc>,
    /// When the outcome was recorded; `None` while in flight
    pub finished_at: Option<DateTime<Utc>>,
    /// Classified outcome; `None` while in flight
    pub outcome: Option<AttemptOutcome>,
    /// Opaque failure payload for diagnostics
    #[serde(default)]
    pub error_detail: Option<Value>,
}

impl TaskAttempt {
    /// Returns true once the outcome has been recorded.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Everything persisted for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Specification the run was created from
    pub spec: RunSpec,
    /// Run state
    pub run: WorkflowRun,
    /// Tasks created so far, in creation order
    pub tasks: Vec<Task>,
    /// Attempt history, in dispatch order
    pub attempts: Vec<TaskAttempt>,
}

impl RunRecord {
    /// Creates a fresh record; every phase starts `pending`, no task exists yet.
    pub fn new(id: RunId, spec: RunSpec, now: DateTime<Utc>) -> Self {
        let phases = spec
            .phases
            .iter()
            .map(|p| Phase {
                name: p.name.clone(),
                tasks: p.tasks.iter().map(|t| t.id.clone()).collect(),
                status: PhaseStatus::Pending,
            })
            .collect();

        Self {
            spec,
            run: WorkflowRun {
                id,
                phases,
                current_phase_index: 0,
                status: RunStatus::Running,
                cancelled: false,
                failure: None,
                created_at: now,
                updated_at: now,
            },
            tasks: Vec::new(),
            attempts: Vec::new(),
        }
    }

    /// Returns the run id.
    pub fn id(&self) -> &RunId {
        &self.run.id
    }

    /// Returns a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| PhaseKitError::TaskNotFound(id.clone()))
    }

    /// Returns the phase at `index`.
    pub fn phase(&self, index: usize) -> Result<&Phase> {
        self.run
            .phases
            .get(index)
            .ok_or_else(|| PhaseKitError::PhaseOrder(format!("No phase at index {}", index)))
    }

    fn phase_mut(&mut self, index: usize) -> Result<&mut Phase> {
        self.run
            .phases
            .get_mut(index)
            .ok_or_else(|| PhaseKitError::PhaseOrder(format!("No phase at index {}", index)))
    }

    /// Returns the tasks of a phase in creation order.
    pub fn tasks_in_phase<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.iter().filter(move |t| t.phase_name == phase)
    }

    /// Returns the attempt history of a task.
    pub fn attempts_for(&self, id: &TaskId) -> Vec<TaskAttempt> {
        self.attempts
            .iter()
            .filter(|a| &a.task_id == id)
            .cloned()
            .collect()
    }

    /// Returns the number of attempts recorded for a task.
    pub fn attempts_used(&self, id: &TaskId) -> u32 {
        self.attempts.iter().filter(|a| &a.task_id == id).count() as u32
    }

    /// Returns dispatchable tasks of a phase in creation order.
    pub fn dispatchable_tasks(&self, phase: &str) -> Vec<Task> {
        self.tasks_in_phase(phase)
            .filter(|t| t.status.is_dispatchable())
            .cloned()
            .collect()
    }

    /// Returns tasks currently marked running anywhere in the run.
    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id.clone())
            .collect()
    }

    /// Enters the phase at `index`.
    ///
    /// Validates the phase DAG, creates its tasks (on first entry) and marks
    /// the phase active. The previous phase must be completed.
    pub fn enter_phase(&mut self, index: usize, default_max_attempts: u32) -> Result<()> {
        if index != self.run.current_phase_index {
            return Err(PhaseKitError::PhaseOrder(format!(
                "Cannot enter phase {} while phase {} is current",
                index, self.run.current_phase_index
            )));
        }
        if index > 0 && self.phase(index - 1)?.status != PhaseStatus::Completed {
            return Err(PhaseKitError::PhaseOrder(format!(
                "Phase '{}' is not completed",
                self.phase(index - 1)?.name
            )));
        }

        let name = self.phase(index)?.name.clone();
        let phase_spec = self
            .spec
            .phase(&name)
            .cloned()
            .ok_or_else(|| PhaseKitError::PhaseOrder(format!("Phase '{}' missing from spec", name)))?;
        PhaseGraph::build(&phase_spec)?;

        let default_max = if default_max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            default_max_attempts
        };

        for spec_task in &phase_spec.tasks {
            if self.task(&spec_task.id).is_some() {
                continue;
            }
            let status = if spec_task.depends_on.is_empty() {
                TaskStatus::Ready
            } else {
                TaskStatus::Blocked
            };
            self.tasks.push(Task {
                id: spec_task.id.clone(),
                phase_name: name.clone(),
                depends_on: spec_task.depends_on.clone(),
                complexity_class: spec_task.complexity_class,
                max_attempts: spec_task.max_attempts.unwrap_or(default_max),
                status,
                payload: spec_task.payload.clone(),
            });
        }

        let phase = self.phase_mut(index)?;
        if phase.status == PhaseStatus::Completed {
            return Err(PhaseKitError::PhaseOrder(format!(
                "Phase '{}' already completed",
                name
            )));
        }
        phase.status = PhaseStatus::Active;
        Ok(())
    }

    fn set_task_status(&mut self, id: &TaskId, next: TaskStatus) -> Result<()> {
        let task = self.task_mut(id)?;
        if !task.status.can_transition_to(next) {
            return Err(PhaseKitError::InvalidTransition {
                task: id.clone(),
                from: task.status,
                to: next,
            });
        }
        task.status = next;
        Ok(())
    }

    /// Starts a new attempt: records it and marks the task running.
    pub fn start_attempt(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<TaskAttempt> {
        let used = self.attempts_used(id);
        let task = self.task(id).ok_or_else(|| PhaseKitError::TaskNotFound(id.clone()))?;
        if used >= task.max_attempts {
            return Err(PhaseKitError::AttemptsExhausted {
                task: id.clone(),
                max_attempts: task.max_attempts,
            });
        }

        self.set_task_status(id, TaskStatus::Running)?;

        let attempt = TaskAttempt {
            task_id: id.clone(),
            attempt_number: used + 1,
            started_at: now,
            finished_at: None,
            outcome: None,
            error_detail: None,
        };
        self.attempts.push(attempt.clone());
        Ok(attempt)
    }

    /// Records the outcome of an in-flight attempt. Finished attempts are immutable.
    pub fn finish_attempt(
        &mut self,
        id: &TaskId,
        attempt_number: u32,
        outcome: AttemptOutcome,
        error_detail: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<TaskAttempt> {
        let attempt = self
            .attempts
            .iter_mut()
            .find(|a| &a.task_id == id && a.attempt_number == attempt_number)
            .ok_or_else(|| PhaseKitError::TaskNotFound(id.clone()))?;

        if attempt.is_finished() {
            return Err(PhaseKitError::Store(format!(
                "Attempt {} of task {} is already finished",
                attempt_number, id
            )));
        }

        attempt.finished_at = Some(now);
        attempt.outcome = Some(outcome);
        attempt.error_detail = error_detail;
        Ok(attempt.clone())
    }

    /// Settles the latest attempt of a task left `running` by an interrupted process.
    ///
    /// - An open attempt is finished as a transient failure.
    /// - A finished attempt is returned unchanged; the process stopped after
    ///   recording the outcome but before applying it to the task.
    /// - With no attempt at all, a transient attempt 1 is recorded.
    pub fn recover_interrupted(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<TaskAttempt> {
        let detail = Some(serde_json::json!({ "error": "attempt interrupted by process restart" }));
        let latest = self
            .attempts
            .iter()
            .rev()
            .find(|a| &a.task_id == id)
            .cloned();

        match latest {
            Some(attempt) if attempt.is_finished() => Ok(attempt),
            Some(attempt) => self.finish_attempt(
                id,
                attempt.attempt_number,
                AttemptOutcome::TransientFailure,
                detail,
                now,
            ),
            None => {
                let task = self.task(id).ok_or_else(|| PhaseKitError::TaskNotFound(id.clone()))?;
                if task.max_attempts == 0 {
                    return Err(PhaseKitError::AttemptsExhausted {
                        task: id.clone(),
                        max_attempts: task.max_attempts,
                    });
                }
                let attempt = TaskAttempt {
                    task_id: id.clone(),
                    attempt_number: 1,
                    started_at: now,
                    finished_at: Some(now),
                    outcome: Some(AttemptOutcome::TransientFailure),
                    error_detail: detail,
                };
                self.attempts.push(attempt.clone());
                Ok(attempt)
            }
        }
    }

    /// Marks a running task succeeded.
    pub fn mark_succeeded(&mut self, id: &TaskId) -> Result<()> {
        self.set_task_status(id, TaskStatus::Succeeded)
    }

    /// Queues a running task for another attempt.
    pub fn mark_failed(&mut self, id: &TaskId) -> Result<()> {
        self.set_task_status(id, TaskStatus::Failed)
    }

    /// Marks a running task escalated.
    pub fn mark_escalated(&mut self, id: &TaskId) -> Result<()> {
        self.set_task_status(id, TaskStatus::Escalated)
    }

    /// Promotes the first blocked task of `phase` whose dependencies all succeeded.
    ///
    /// Returns the promoted task id, or `None` when nothing became ready.
    pub fn promote_next_ready(&mut self, phase: &str) -> Option<TaskId> {
        let candidate = self
            .tasks_in_phase(phase)
            .filter(|t| t.status == TaskStatus::Blocked)
            .find(|t| {
                t.depends_on.iter().all(|dep| {
                    self.task(dep)
                        .map(|d| d.status == TaskStatus::Succeeded)
                        .unwrap_or(false)
                })
            })
            .map(|t| t.id.clone())?;

        self.set_task_status(&candidate, TaskStatus::Ready).ok()?;
        Some(candidate)
    }

    /// Returns escalated tasks of a phase.
    pub fn escalated_tasks<'a>(&'a self, phase: &'a str) -> Vec<&'a Task> {
        self.tasks_in_phase(phase)
            .filter(|t| t.status == TaskStatus::Escalated)
            .collect()
    }

    /// Returns true if every task of the phase succeeded.
    pub fn phase_succeeded(&self, index: usize) -> Result<bool> {
        let phase = self.phase(index)?;
        Ok(phase.tasks.iter().all(|id| {
            self.task(id)
                .map(|t| t.status == TaskStatus::Succeeded)
                .unwrap_or(false)
        }))
    }

    /// Marks the active phase blocked.
    pub fn block_phase(&mut self, index: usize) -> Result<()> {
        let phase = self.phase_mut(index)?;
        if phase.status != PhaseStatus::Active {
            return Err(PhaseKitError::PhaseOrder(format!(
                "Cannot block phase '{}' in status {:?}",
                phase.name, phase.status
            )));
        }
        phase.status = PhaseStatus::Blocked;
        Ok(())
    }

    /// Marks the active phase completed and advances the run to the next phase.
    pub fn complete_phase(&mut self, index: usize) -> Result<()> {
        if !self.phase_succeeded(index)? {
            return Err(PhaseKitError::PhaseOrder(format!(
                "Phase '{}' has unfinished tasks",
                self.phase(index)?.name
            )));
        }
        let phase = self.phase_mut(index)?;
        if phase.status != PhaseStatus::Active {
            return Err(PhaseKitError::PhaseOrder(format!(
                "Cannot complete phase '{}' in status {:?}",
                phase.name, phase.status
            )));
        }
        phase.status = PhaseStatus::Completed;
        self.run.current_phase_index = index + 1;
        Ok(())
    }

    /// Reopens a stopped run for another invocation of the engine.
    ///
    /// Clears failure and cancellation markers, reactivates a blocked phase
    /// and returns its escalated tasks with attempts left to the retry queue.
    /// Returns the ids of requeued tasks.
    pub fn reopen(&mut self) -> Result<Vec<TaskId>> {
        self.run.status = RunStatus::Running;
        self.run.cancelled = false;
        self.run.failure = None;

        let index = self.run.current_phase_index;
        let Some(phase) = self.run.phases.get_mut(index) else {
            return Ok(Vec::new());
        };
        if phase.status == PhaseStatus::Blocked {
            phase.status = PhaseStatus::Active;
        }
        let phase_name = phase.name.clone();

        let reopenable: Vec<TaskId> = self
            .escalated_tasks(&phase_name)
            .into_iter()
            .filter(|t| self.attempts_used(&t.id) < t.max_attempts)
            .map(|t| t.id.clone())
            .collect();

        for id in &reopenable {
            // Escalated -> Failed is only legal here, on explicit resumption.
            self.task_mut(id)?.status = TaskStatus::Failed;
        }
        Ok(reopenable)
    }

    /// Adopts attempt budgets and payloads from a resubmitted specification.
    ///
    /// A task queued for retry whose used attempts already reach its new
    /// budget is escalated. Returns the ids of tasks escalated this way.
    pub fn adopt_budgets(&mut self, spec: &RunSpec, default_max_attempts: u32) -> Vec<TaskId> {
        let mut escalated = Vec::new();
        for phase in &spec.phases {
            for spec_task in &phase.tasks {
                let budget = spec_task.max_attempts.unwrap_or(default_max_attempts);
                let used = self.attempts_used(&spec_task.id);
                if let Some(task) = self.tasks.iter_mut().find(|t| t.id == spec_task.id) {
                    task.max_attempts = budget;
                    task.payload = spec_task.payload.clone();
                    if task.status == TaskStatus::Failed && used >= budget {
                        // Failed -> Escalated is only legal here, when a budget shrinks.
                        task.status = TaskStatus::Escalated;
                        escalated.push(task.id.clone());
                    }
                }
            }
        }
        self.spec = spec.clone();
        escalated
    }

    /// Sets the terminal status of the run.
    pub fn finish_run(&mut self, status: RunStatus, failure: Option<String>, cancelled: bool) {
        self.run.status = status;
        self.run.failure = failure;
        self.run.cancelled = cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{PhaseSpec, TaskSpec};

    fn record() -> RunRecord {
        let spec = RunSpec::new(vec![
            PhaseSpec::new(
                "codegen",
                vec![
                    TaskSpec::new("a"),
                    TaskSpec::new("b").depends_on("a"),
                    TaskSpec::new("c").with_max_attempts(1),
                ],
            ),
            PhaseSpec::new("test", vec![TaskSpec::new("d")]),
        ])
        .with_id("run-1");
        RunRecord::new(RunId::new("run-1"), spec, Utc::now())
    }

    #[test]
    fn test_new_record_has_no_tasks() {
        let rec = record();
        assert!(rec.tasks.is_empty());
        assert_eq!(rec.run.phases.len(), 2);
        assert!(rec.run.phases.iter().all(|p| p.status == PhaseStatus::Pending));
        assert_eq!(rec.run.status, RunStatus::Running);
    }

    #[test]
    fn test_enter_phase_creates_tasks() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();

        assert_eq!(rec.run.phases[0].status, PhaseStatus::Active);
        assert_eq!(rec.tasks.len(), 3);
        assert_eq!(rec.task(&"a".into()).unwrap().status, TaskStatus::Ready);
        assert_eq!(rec.task(&"b".into()).unwrap().status, TaskStatus::Blocked);
        assert_eq!(rec.task(&"a".into()).unwrap().max_attempts, 3);
        assert_eq!(rec.task(&"c".into()).unwrap().max_attempts, 1);
    }

    #[test]
    fn test_cannot_skip_phase() {
        let mut rec = record();
        assert!(matches!(rec.enter_phase(1, 3), Err(PhaseKitError::PhaseOrder(_))));
    }

    #[test]
    fn test_attempt_lifecycle_and_promotion() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");

        let attempt = rec.start_attempt(&a, Utc::now()).unwrap();
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(rec.task(&a).unwrap().status, TaskStatus::Running);

        rec.finish_attempt(&a, 1, AttemptOutcome::Success, None, Utc::now())
            .unwrap();
        rec.mark_succeeded(&a).unwrap();

        assert_eq!(rec.promote_next_ready("codegen"), Some(TaskId::new("b")));
        assert_eq!(rec.promote_next_ready("codegen"), None);
        assert_eq!(rec.task(&"b".into()).unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn test_finished_attempt_is_immutable() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");
        rec.start_attempt(&a, Utc::now()).unwrap();
        rec.finish_attempt(&a, 1, AttemptOutcome::TransientFailure, None, Utc::now())
            .unwrap();
        assert!(rec
            .finish_attempt(&a, 1, AttemptOutcome::Success, None, Utc::now())
            .is_err());
    }

    #[test]
    fn test_no_backward_transition() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");
        rec.start_attempt(&a, Utc::now()).unwrap();
        rec.mark_succeeded(&a).unwrap();

        assert!(matches!(
            rec.start_attempt(&a, Utc::now()),
            Err(PhaseKitError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_attempt_budget_enforced() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let c = TaskId::new("c");
        rec.start_attempt(&c, Utc::now()).unwrap();
        rec.finish_attempt(&c, 1, AttemptOutcome::TransientFailure, None, Utc::now())
            .unwrap();
        rec.mark_failed(&c).unwrap();

        assert!(matches!(
            rec.start_attempt(&c, Utc::now()),
            Err(PhaseKitError::AttemptsExhausted { .. })
        ));
    }

    #[test]
    fn test_complete_phase_advances() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        assert!(rec.complete_phase(0).is_err());

        for id in ["a", "c"] {
            let id = TaskId::new(id);
            rec.start_attempt(&id, Utc::now()).unwrap();
            rec.mark_succeeded(&id).unwrap();
        }
        rec.promote_next_ready("codegen");
        let b = TaskId::new("b");
        rec.start_attempt(&b, Utc::now()).unwrap();
        rec.mark_succeeded(&b).unwrap();

        rec.complete_phase(0).unwrap();
        assert_eq!(rec.run.current_phase_index, 1);
        rec.enter_phase(1, 3).unwrap();
        assert_eq!(rec.run.phases[1].status, PhaseStatus::Active);
    }

    #[test]
    fn test_recover_interrupted_consumes_attempt() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");
        rec.start_attempt(&a, Utc::now()).unwrap();

        let recovered = rec.recover_interrupted(&a, Utc::now()).unwrap();
        assert_eq!(recovered.attempt_number, 1);
        assert_eq!(recovered.outcome, Some(AttemptOutcome::TransientFailure));
        assert_eq!(rec.attempts_used(&a), 1);
    }

    #[test]
    fn test_recover_keeps_recorded_outcome() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let c = TaskId::new("c");
        rec.start_attempt(&c, Utc::now()).unwrap();
        rec.finish_attempt(&c, 1, AttemptOutcome::Success, None, Utc::now())
            .unwrap();

        let recovered = rec.recover_interrupted(&c, Utc::now()).unwrap();
        assert_eq!(recovered.attempt_number, 1);
        assert_eq!(recovered.outcome, Some(AttemptOutcome::Success));
        assert_eq!(rec.attempts_used(&c), 1);
    }

    #[test]
    fn test_recover_without_attempt_records_first() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");
        rec.task_mut(&a).unwrap().status = TaskStatus::Running;

        let recovered = rec.recover_interrupted(&a, Utc::now()).unwrap();
        assert_eq!(recovered.attempt_number, 1);
        assert_eq!(recovered.outcome, Some(AttemptOutcome::TransientFailure));
    }

    #[test]
    fn test_reopen_requeues_tasks_with_budget() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");
        let c = TaskId::new("c");
        for id in [&a, &c] {
            rec.start_attempt(id, Utc::now()).unwrap();
            rec.finish_attempt(id, 1, AttemptOutcome::FatalFailure, None, Utc::now())
                .unwrap();
            rec.mark_escalated(id).unwrap();
        }
        rec.block_phase(0).unwrap();
        rec.finish_run(RunStatus::Escalated, None, false);
        let escalated: Vec<&TaskId> = rec
            .escalated_tasks("codegen")
            .into_iter()
            .map(|t| &t.id)
            .collect();
        assert_eq!(escalated, vec![&a, &c]);

        let requeued = rec.reopen().unwrap();
        assert_eq!(requeued, vec![a.clone()]);
        assert_eq!(rec.run.status, RunStatus::Running);
        assert_eq!(rec.run.phases[0].status, PhaseStatus::Active);
        assert_eq!(rec.task(&a).unwrap().status, TaskStatus::Failed);
        assert_eq!(rec.task(&c).unwrap().status, TaskStatus::Escalated);
    }

    #[test]
    fn test_adopt_budgets() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let mut spec = rec.spec.clone();
        spec.phases[0].tasks[2].max_attempts = Some(4);
        assert!(rec.adopt_budgets(&spec, 3).is_empty());
        assert_eq!(rec.task(&"c".into()).unwrap().max_attempts, 4);
    }

    #[test]
    fn test_lowered_budget_escalates_queued_task() {
        let mut rec = record();
        rec.enter_phase(0, 3).unwrap();
        let a = TaskId::new("a");
        for n in 1..=2 {
            rec.start_attempt(&a, Utc::now()).unwrap();
            rec.finish_attempt(&a, n, AttemptOutcome::TransientFailure, None, Utc::now())
                .unwrap();
            rec.mark_failed(&a).unwrap();
        }

        let mut spec = rec.spec.clone();
        spec.phases[0].tasks[0].max_attempts = Some(2);
        assert_eq!(rec.adopt_budgets(&spec, 3), vec![a.clone()]);
        assert_eq!(rec.task(&a).unwrap().status, TaskStatus::Escalated);
        assert!(rec.dispatchable_tasks("codegen").iter().all(|t| t.id != a));
    }
}
