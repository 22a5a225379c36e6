//! Common test utilities for phasekit engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phasekit_core::{
    ComplexityClass, MemoryStateStore, PhaseKitError, RunId, RunRecord, StateStore, Task, TaskId,
    TaskStatus,
};
use phasekit_engine::{
    Classification, Collaborator, EngineConfig, InvocationContext, OutcomeClassifier, RawResult,
    WorkflowEngine,
};
use serde_json::json;

/// One scripted collaborator response.
#[derive(Clone, Debug)]
pub enum Step {
    /// Returns `{"status": "ok"}`
    Ok,
    /// Returns an error, classified as a transient failure
    Transient,
    /// Returns `{"status": "fatal"}`, classified as a fatal failure
    Fatal,
    /// Sleeps, then returns `{"status": "ok"}`
    Sleep(Duration),
}

type InvokeHook = Box<dyn Fn(&TaskId) + Send + Sync>;

/// Collaborator that replays per-task scripts and records what it saw.
///
/// Tasks without a script (or with an exhausted one) succeed.
pub struct ScriptedCollaborator {
    scripts: Mutex<HashMap<TaskId, VecDeque<Step>>>,
    latency: Duration,
    invocations: Mutex<Vec<(TaskId, u32)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    on_invoke: Option<InvokeHook>,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            on_invoke: None,
        }
    }

    /// Scripts the responses of `task`, one per attempt.
    pub fn script(self, task: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(TaskId::new(task), steps.into());
        self
    }

    /// Delay added to every invocation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Hook called at the start of every invocation.
    pub fn on_invoke(mut self, hook: impl Fn(&TaskId) + Send + Sync + 'static) -> Self {
        self.on_invoke = Some(Box::new(hook));
        self
    }

    /// `(task, attempt_number)` in invocation order.
    pub fn invocations(&self) -> Vec<(TaskId, u32)> {
        self.invocations.lock().unwrap().clone()
    }

    /// Task ids in invocation order.
    pub fn invoked_tasks(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|(id, _)| id.as_str().to_string())
            .collect()
    }

    /// Highest number of simultaneous invocations observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_step(&self, task: &TaskId) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(task)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Ok)
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn invoke(&self, task: &Task, context: &InvocationContext) -> anyhow::Result<RawResult> {
        let step = self.next_step(&task.id);
        self.invocations
            .lock()
            .unwrap()
            .push((task.id.clone(), context.attempt_number));

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        if let Some(hook) = &self.on_invoke {
            hook(&task.id);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = match step {
            Step::Ok => Ok(json!({ "status": "ok" })),
            Step::Transient => Err(anyhow::anyhow!("upstream unavailable")),
            Step::Fatal => Ok(json!({ "status": "fatal", "reason": "invalid input" })),
            Step::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(json!({ "status": "ok" }))
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Classifies `{"status": "fatal"}` as fatal, other values as success and
/// errors as transient.
pub fn status_classifier() -> Arc<dyn OutcomeClassifier> {
    Arc::new(|_: &Task, result: &anyhow::Result<RawResult>| match result {
        Ok(value) if value["status"] == "fatal" => Classification::fatal(value.clone()),
        Ok(_) => Classification::success(),
        Err(e) => Classification::transient(json!({ "error": e.to_string() })),
    })
}

/// Store that records every save and can be told to fail.
pub struct RecordingStore {
    inner: MemoryStateStore,
    saves: AtomicUsize,
    peak_running: AtomicUsize,
    fail_after: Option<usize>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStateStore::new(),
            saves: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Fails every save after the first `n` successful ones.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new()
        }
    }

    /// Number of save calls, failed ones included.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Highest number of running tasks in any persisted record.
    pub fn peak_running(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStateStore {
        &self.inner
    }
}

#[async_trait]
impl StateStore for RecordingStore {
    async fn save(&self, record: &RunRecord) -> phasekit_core::Result<()> {
        let previous = self.saves.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if previous >= limit {
                return Err(PhaseKitError::Store("disk full".to_string()));
            }
        }

        let running = record
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count();
        self.peak_running.fetch_max(running, Ordering::SeqCst);
        self.inner.save(record).await
    }

    async fn load(&self, run_id: &RunId) -> phasekit_core::Result<Option<RunRecord>> {
        self.inner.load(run_id).await
    }

    async fn archive(&self, run_id: &RunId) -> phasekit_core::Result<()> {
        self.inner.archive(run_id).await
    }
}

/// Engine wired to `store` and `collaborator` with the status classifier
/// and no task timeout.
pub fn engine(
    store: Arc<dyn StateStore>,
    collaborator: Arc<ScriptedCollaborator>,
    capacity: usize,
) -> WorkflowEngine {
    WorkflowEngine::new(store)
        .with_collaborator(ComplexityClass::Simple, collaborator.clone())
        .with_collaborator(ComplexityClass::Complex, collaborator)
        .with_classifier(status_classifier())
        .with_config(
            EngineConfig::default()
                .with_pool_capacity(capacity)
                .with_task_timeout(None),
        )
}
