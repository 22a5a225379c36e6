//! Runs a single attempt of a task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use phasekit_core::{RunId, Task, TaskAttempt, TaskId};
use serde_json::json;

use super::cancellation::CancellationToken;
use super::collaborator::{Classification, CollaboratorRegistry, InvocationContext, OutcomeClassifier};
use super::ledger::LedgerHandle;
use crate::Result;

/// Dispatches attempts to the collaborator serving each task's class.
///
/// An attempt is recorded (and persisted) before the collaborator is invoked
/// and its outcome is recorded right after, so a crash in between leaves a
/// visible open attempt for recovery.
pub struct TaskDispatcher {
    run_id: RunId,
    registry: Arc<CollaboratorRegistry>,
    classifier: Arc<dyn OutcomeClassifier>,
    ledger: LedgerHandle,
    timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl TaskDispatcher {
    pub(crate) fn new(
        run_id: RunId,
        registry: Arc<CollaboratorRegistry>,
        classifier: Arc<dyn OutcomeClassifier>,
        ledger: LedgerHandle,
        timeout: Option<Duration>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            registry,
            classifier,
            ledger,
            timeout,
            cancellation,
        }
    }

    /// Starts, performs and finishes one attempt of `task_id`.
    ///
    /// Returns the task as it was dispatched and the finished attempt.
    /// Collaborator failures, timeouts and panics are attempt outcomes;
    /// only ledger errors are returned as `Err`.
    pub async fn dispatch(&self, task_id: &TaskId) -> Result<(Task, TaskAttempt)> {
        let (task, attempt) = self.ledger.start_attempt(task_id.clone()).await?;
        tracing::debug!(
            "Dispatching task {} (attempt {}/{})",
            task.id,
            attempt.attempt_number,
            task.max_attempts
        );

        let classification = self.invoke(&task, attempt.attempt_number).await;
        let finished = self
            .ledger
            .finish_attempt(task_id.clone(), attempt.attempt_number, classification)
            .await?;

        tracing::info!(
            "Task {} attempt {} finished: {:?}",
            task.id,
            finished.attempt_number,
            finished.outcome
        );
        Ok((task, finished))
    }

    async fn invoke(&self, task: &Task, attempt_number: u32) -> Classification {
        let Some(collaborator) = self.registry.get(task.complexity_class) else {
            return Classification::fatal(json!({
                "error": format!("no collaborator for complexity class '{}'", task.complexity_class)
            }));
        };

        let context = InvocationContext::new(
            self.run_id.clone(),
            task.phase_name.clone(),
            attempt_number,
            self.timeout,
            self.cancellation.clone(),
        );
        let call = AssertUnwindSafe(collaborator.invoke(task, &context)).catch_unwind();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Task {} timed out after {:?}", task.id, limit);
                    return Classification::transient(json!({
                        "error": "timeout",
                        "timeout_ms": u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    }));
                }
            },
            None => call.await,
        };

        match result {
            Ok(raw) => self.classifier.classify(task, &raw),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!("Collaborator panicked on task {}: {}", task.id, message);
                Classification::transient(json!({
                    "error": format!("collaborator panicked: {}", message)
                }))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
