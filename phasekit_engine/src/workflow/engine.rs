//! Workflow engine: runs phases in order and reports the outcome.

use std::sync::Arc;

use chrono::Utc;
use phasekit_core::{
    ComplexityClass, ConcurrencyPool, PhaseStatus, RunId, RunRecord, RunSpec, RunStatus,
    StateStore, Task, TaskAttempt,
};
use serde::{Deserialize, Serialize};

use super::cancellation::{CancellationToken, CancellationTokenSource};
use super::collaborator::{Collaborator, CollaboratorRegistry, OutcomeClassifier, ResultClassifier};
use super::config::EngineConfig;
use super::dispatcher::TaskDispatcher;
use super::ledger::LedgerHandle;
use super::phase::{PhaseOutcome, PhaseRunner};
use crate::{EngineError, Result};

/// An escalated task together with its full attempt history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EscalationReport {
    /// The escalated task
    pub task: Task,
    /// Every attempt of the task, oldest first
    pub attempts: Vec<TaskAttempt>,
}

/// Outcome of a run as seen by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// Terminal (or, for a stored run still in progress, current) status
    pub status: RunStatus,
    /// Phase that stopped the run, if any
    pub blocked_phase: Option<String>,
    /// Escalated tasks awaiting human review
    pub escalations: Vec<EscalationReport>,
    /// Reason for an engine failure or cancellation
    pub failure: Option<String>,
    /// True if the run stopped because it was cancelled
    pub cancelled: bool,
    /// Status of every phase, in order
    pub phases: Vec<(String, PhaseStatus)>,
}

impl RunReport {
    /// Builds a report from a run record.
    pub fn from_record(record: &RunRecord) -> Self {
        let blocked_phase = record
            .run
            .phases
            .iter()
            .find(|p| p.status == PhaseStatus::Blocked)
            .map(|p| p.name.clone());

        let escalations = match &blocked_phase {
            Some(phase) => record
                .escalated_tasks(phase)
                .into_iter()
                .map(|task| EscalationReport {
                    task: task.clone(),
                    attempts: record.attempts_for(&task.id),
                })
                .collect(),
            None => Vec::new(),
        };

        Self {
            run_id: record.id().clone(),
            status: record.run.status,
            blocked_phase,
            escalations,
            failure: record.run.failure.clone(),
            cancelled: record.run.cancelled,
            phases: record
                .run
                .phases
                .iter()
                .map(|p| (p.name.clone(), p.status))
                .collect(),
        }
    }

    /// Returns true if every phase completed.
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Orchestrates workflow runs against a state store.
///
/// # Example
///
/// ```ignore
/// let engine = WorkflowEngine::new(Arc::new(MemoryStateStore::new()))
///     .with_collaborator(ComplexityClass::Simple, Arc::new(MyAgent))
///     .with_config(EngineConfig::default().with_pool_capacity(2));
///
/// let report = engine.run(spec).await?;
/// ```
pub struct WorkflowEngine {
    store: Arc<dyn StateStore>,
    registry: CollaboratorRegistry,
    classifier: Arc<dyn OutcomeClassifier>,
    config: EngineConfig,
    cancellation_source: CancellationTokenSource,
}

impl WorkflowEngine {
    /// Creates an engine with default configuration and the [`ResultClassifier`].
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            registry: CollaboratorRegistry::new(),
            classifier: Arc::new(ResultClassifier),
            config: EngineConfig::default(),
            cancellation_source: CancellationTokenSource::new(),
        }
    }

    /// Creates an engine persisting to `config.state_dir`.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(config.file_store());
        Ok(Self::new(store).with_config(config))
    }

    /// Replaces the engine configuration; it is validated when a run starts.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the collaborator serving `class`.
    pub fn with_collaborator(
        mut self,
        class: ComplexityClass,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        self.registry.register(class, collaborator);
        self
    }

    /// Replaces all registered collaborators.
    pub fn with_registry(mut self, registry: CollaboratorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the classifier mapping collaborator results to attempt outcomes.
    pub fn with_classifier(mut self, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the cancellation source; keep a clone to cancel runs.
    pub fn with_cancellation_source(mut self, source: CancellationTokenSource) -> Self {
        self.cancellation_source = source;
        self
    }

    /// Returns a token observing this engine's cancellation source.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_source.token()
    }

    /// Requests cancellation of the run in progress.
    ///
    /// No new attempts are dispatched; in-flight attempts finish and are
    /// recorded, then the run is persisted as failed with `cancelled` set.
    /// The source is reset when that run returns, so the next `run` on this
    /// engine starts uncancelled. A cancel issued while no run is in
    /// progress stops the next run before it dispatches anything.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancellation_source.cancel();
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs (or resumes) the run described by `spec` until it reaches a
    /// terminal status.
    ///
    /// Returns `Err` only for rejected input: invalid configuration or
    /// specification, a complexity class without a collaborator, or a
    /// structure change against the persisted run. Engine failures during
    /// execution are reported as a failed [`RunReport`].
    pub async fn run(&self, spec: RunSpec) -> Result<RunReport> {
        self.config.validate()?;
        spec.validate()?;
        self.registry.ensure_covers(&spec)?;

        let run_id = spec.run_id();
        let spec = spec.with_id(run_id.as_str());
        let (record, resumed) = match self.store.load(&run_id).await? {
            Some(mut record) => {
                if record.spec.structure_checksum() != spec.structure_checksum() {
                    return Err(EngineError::SpecChanged(run_id));
                }
                if record.run.status == RunStatus::Completed {
                    tracing::info!("Run {} already completed", run_id);
                    return Ok(RunReport::from_record(&record));
                }
                for task_id in record.adopt_budgets(&spec, self.config.default_max_attempts) {
                    tracing::warn!("Task {} escalated: budget lowered below attempts used", task_id);
                }
                (record, true)
            }
            None => (RunRecord::new(run_id.clone(), spec, Utc::now()), false),
        };

        let ledger = LedgerHandle::spawn(record, self.store.clone());
        let outcome = self.drive(&ledger, resumed).await;
        // A cancellation applies to one run only.
        if self.cancellation_source.is_cancelled() {
            self.cancellation_source.reset();
        }
        if let Err(e) = outcome {
            return self.fail(&ledger, e).await;
        }

        let report = RunReport::from_record(&ledger.snapshot().await?);
        tracing::info!("Run {} finished: {:?}", report.run_id, report.status);
        Ok(report)
    }

    /// Returns the report of a stored run.
    pub async fn status(&self, run_id: &RunId) -> Result<Option<RunReport>> {
        let record = self.store.load(run_id).await?;
        Ok(record.as_ref().map(RunReport::from_record))
    }

    /// Archives a terminal run after the caller has handled its report.
    pub async fn acknowledge(&self, run_id: &RunId) -> Result<()> {
        let record = self
            .store
            .load(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.clone()))?;
        if !record.run.status.is_terminal() {
            return Err(EngineError::RunNotTerminal(run_id.clone()));
        }
        self.store.archive(run_id).await?;
        tracing::info!("Run {} archived", run_id);
        Ok(())
    }

    async fn drive(&self, ledger: &LedgerHandle, resumed: bool) -> Result<()> {
        let token = self.cancellation_source.token();

        if resumed {
            self.recover(ledger).await?;
        } else {
            ledger.checkpoint().await?;
        }

        let record = ledger.snapshot().await?;
        tracing::info!(
            "Run {} {} at phase {}/{}",
            record.id(),
            if resumed { "resuming" } else { "starting" },
            record.run.current_phase_index + 1,
            record.run.phases.len()
        );

        let dispatcher = Arc::new(TaskDispatcher::new(
            record.id().clone(),
            Arc::new(self.registry.clone()),
            self.classifier.clone(),
            ledger.clone(),
            self.config.task_timeout(),
            token.clone(),
        ));
        let runner = PhaseRunner::new(
            ledger.clone(),
            ConcurrencyPool::new(self.config.pool_capacity),
            dispatcher,
            self.config.retry.clone(),
            token.clone(),
            self.config.default_max_attempts,
        );

        for index in record.run.current_phase_index..record.run.phases.len() {
            if token.is_cancelled() {
                return self.stop_cancelled(ledger).await;
            }
            match runner.run(index).await? {
                PhaseOutcome::Completed => {}
                PhaseOutcome::Blocked => {
                    return ledger.finish_run(RunStatus::Escalated, None, false).await;
                }
                PhaseOutcome::Cancelled => return self.stop_cancelled(ledger).await,
            }
        }

        ledger.finish_run(RunStatus::Completed, None, false).await
    }

    /// Prepares a stored run for another pass.
    async fn recover(&self, ledger: &LedgerHandle) -> Result<()> {
        for task_id in ledger.reopen().await? {
            tracing::info!("Task {} requeued for retry", task_id);
        }

        let policy = &self.config.retry;
        for task_id in ledger.snapshot().await?.running_tasks() {
            tracing::warn!("Task {} was running when the run stopped", task_id);
            let (task, attempt) = ledger.recover_interrupted(task_id.clone()).await?;
            ledger.resolve(task_id, policy.decide(&task, &attempt)).await?;
        }
        Ok(())
    }

    async fn stop_cancelled(&self, ledger: &LedgerHandle) -> Result<()> {
        tracing::info!("Run stopped by cancellation");
        ledger
            .finish_run(RunStatus::Failed, Some("run cancelled".to_string()), true)
            .await
    }

    async fn fail(&self, ledger: &LedgerHandle, error: EngineError) -> Result<RunReport> {
        let reason = error.to_string();
        tracing::error!("Run failed: {}", reason);

        // Best effort; a poisoned ledger refuses this write.
        if let Err(e) = ledger
            .finish_run(RunStatus::Failed, Some(reason.clone()), false)
            .await
        {
            tracing::warn!("Could not persist run failure: {}", e);
        }

        let mut report = RunReport::from_record(&ledger.snapshot().await?);
        report.status = RunStatus::Failed;
        report.failure = Some(reason);
        Ok(report)
    }
}
