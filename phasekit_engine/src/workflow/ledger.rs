//! Single writer for a run's durable state.
//!
//! The ledger task owns the [`RunRecord`]. Every mutation arrives as a
//! command over a channel, is applied to the record and persisted before
//! the reply is sent, so concurrent lanes never race on the record and no
//! transition is acknowledged before it is durable.
//!
//! A failed save poisons the ledger: the in-memory record may be ahead of
//! the stored one, so every later transition is refused.

use std::sync::Arc;

use chrono::Utc;
use phasekit_core::{
    Decision, RunRecord, RunStatus, StateStore, Task, TaskAttempt, TaskId, TaskStatus,
};
use tokio::sync::{mpsc, oneshot};

use super::collaborator::Classification;
use crate::{EngineError, Result};

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Checkpoint {
        reply: Reply<()>,
    },
    EnterPhase {
        index: usize,
        default_max_attempts: u32,
        reply: Reply<()>,
    },
    StartAttempt {
        task_id: TaskId,
        reply: Reply<(Task, TaskAttempt)>,
    },
    FinishAttempt {
        task_id: TaskId,
        attempt_number: u32,
        classification: Classification,
        reply: Reply<TaskAttempt>,
    },
    RecoverInterrupted {
        task_id: TaskId,
        reply: Reply<(Task, TaskAttempt)>,
    },
    Resolve {
        task_id: TaskId,
        decision: Decision,
        reply: Reply<TaskStatus>,
    },
    Reopen {
        reply: Reply<Vec<TaskId>>,
    },
    BlockPhase {
        index: usize,
        reply: Reply<()>,
    },
    CompletePhase {
        index: usize,
        reply: Reply<()>,
    },
    FinishRun {
        status: RunStatus,
        failure: Option<String>,
        cancelled: bool,
        reply: Reply<()>,
    },
    Snapshot {
        reply: oneshot::Sender<RunRecord>,
    },
}

/// Handle for submitting transitions to a run's ledger.
#[derive(Clone, Debug)]
pub(crate) struct LedgerHandle {
    tx: mpsc::Sender<Command>,
}

impl LedgerHandle {
    /// Spawns the ledger task for `record`.
    ///
    /// The task exits once every handle has been dropped.
    pub(crate) fn spawn(record: RunRecord, store: Arc<dyn StateStore>) -> Self {
        let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);
        let mut ledger = Ledger {
            record,
            store,
            poisoned: None,
        };
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                ledger.handle(command).await;
            }
            tracing::debug!("Ledger for run {} closed", ledger.record.id());
        });
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::LedgerClosed)?;
        rx.await.map_err(|_| EngineError::LedgerClosed)?
    }

    /// Persists the record as it stands.
    pub(crate) async fn checkpoint(&self) -> Result<()> {
        self.request(|reply| Command::Checkpoint { reply }).await
    }

    pub(crate) async fn enter_phase(&self, index: usize, default_max_attempts: u32) -> Result<()> {
        self.request(|reply| Command::EnterPhase {
            index,
            default_max_attempts,
            reply,
        })
        .await
    }

    /// Records a new attempt and marks the task running.
    pub(crate) async fn start_attempt(&self, task_id: TaskId) -> Result<(Task, TaskAttempt)> {
        self.request(|reply| Command::StartAttempt { task_id, reply })
            .await
    }

    pub(crate) async fn finish_attempt(
        &self,
        task_id: TaskId,
        attempt_number: u32,
        classification: Classification,
    ) -> Result<TaskAttempt> {
        self.request(|reply| Command::FinishAttempt {
            task_id,
            attempt_number,
            classification,
            reply,
        })
        .await
    }

    /// Closes the attempt of a task left running by a previous process.
    pub(crate) async fn recover_interrupted(&self, task_id: TaskId) -> Result<(Task, TaskAttempt)> {
        self.request(|reply| Command::RecoverInterrupted { task_id, reply })
            .await
    }

    /// Applies a retry decision to a running task.
    ///
    /// On success, newly unblocked tasks of the phase are promoted to ready.
    pub(crate) async fn resolve(&self, task_id: TaskId, decision: Decision) -> Result<TaskStatus> {
        self.request(|reply| Command::Resolve {
            task_id,
            decision,
            reply,
        })
        .await
    }

    pub(crate) async fn reopen(&self) -> Result<Vec<TaskId>> {
        self.request(|reply| Command::Reopen { reply }).await
    }

    pub(crate) async fn block_phase(&self, index: usize) -> Result<()> {
        self.request(|reply| Command::BlockPhase { index, reply })
            .await
    }

    pub(crate) async fn complete_phase(&self, index: usize) -> Result<()> {
        self.request(|reply| Command::CompletePhase { index, reply })
            .await
    }

    pub(crate) async fn finish_run(
        &self,
        status: RunStatus,
        failure: Option<String>,
        cancelled: bool,
    ) -> Result<()> {
        self.request(|reply| Command::FinishRun {
            status,
            failure,
            cancelled,
            reply,
        })
        .await
    }

    /// Returns a copy of the in-memory record.
    pub(crate) async fn snapshot(&self) -> Result<RunRecord> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| EngineError::LedgerClosed)?;
        rx.await.map_err(|_| EngineError::LedgerClosed)
    }
}

struct Ledger {
    record: RunRecord,
    store: Arc<dyn StateStore>,
    poisoned: Option<String>,
}

impl Ledger {
    async fn handle(&mut self, command: Command) {
        // A dropped receiver means the requester gave up; nothing to report.
        match command {
            Command::Checkpoint { reply } => {
                let result = self.checkpoint().await;
                let _ = reply.send(result);
            }
            Command::EnterPhase {
                index,
                default_max_attempts,
                reply,
            } => {
                let result = self.enter_phase(index, default_max_attempts).await;
                let _ = reply.send(result);
            }
            Command::StartAttempt { task_id, reply } => {
                let result = self.start_attempt(&task_id).await;
                let _ = reply.send(result);
            }
            Command::FinishAttempt {
                task_id,
                attempt_number,
                classification,
                reply,
            } => {
                let result = self
                    .finish_attempt(&task_id, attempt_number, classification)
                    .await;
                let _ = reply.send(result);
            }
            Command::RecoverInterrupted { task_id, reply } => {
                let result = self.recover_interrupted(&task_id).await;
                let _ = reply.send(result);
            }
            Command::Resolve {
                task_id,
                decision,
                reply,
            } => {
                let result = self.resolve(&task_id, decision).await;
                let _ = reply.send(result);
            }
            Command::Reopen { reply } => {
                let result = self.reopen().await;
                let _ = reply.send(result);
            }
            Command::BlockPhase { index, reply } => {
                let result = self.block_phase(index).await;
                let _ = reply.send(result);
            }
            Command::CompletePhase { index, reply } => {
                let result = self.complete_phase(index).await;
                let _ = reply.send(result);
            }
            Command::FinishRun {
                status,
                failure,
                cancelled,
                reply,
            } => {
                let result = self.finish_run(status, failure, cancelled).await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.record.clone());
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(EngineError::Persistence(reason.clone())),
            None => Ok(()),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.record.run.updated_at = Utc::now();
        if let Err(e) = self.store.save(&self.record).await {
            let reason = format!("saving run {}: {}", self.record.id(), e);
            tracing::error!("Failed to persist run state: {}", reason);
            self.poisoned = Some(reason.clone());
            return Err(EngineError::Persistence(reason));
        }
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.commit().await
    }

    async fn enter_phase(&mut self, index: usize, default_max_attempts: u32) -> Result<()> {
        self.ensure_writable()?;
        self.record.enter_phase(index, default_max_attempts)?;
        self.commit().await
    }

    async fn start_attempt(&mut self, task_id: &TaskId) -> Result<(Task, TaskAttempt)> {
        self.ensure_writable()?;
        let attempt = self.record.start_attempt(task_id, Utc::now())?;
        self.commit().await?;
        Ok((self.task(task_id)?, attempt))
    }

    async fn finish_attempt(
        &mut self,
        task_id: &TaskId,
        attempt_number: u32,
        classification: Classification,
    ) -> Result<TaskAttempt> {
        self.ensure_writable()?;
        let attempt = self.record.finish_attempt(
            task_id,
            attempt_number,
            classification.outcome,
            classification.error_detail,
            Utc::now(),
        )?;
        self.commit().await?;
        Ok(attempt)
    }

    async fn recover_interrupted(&mut self, task_id: &TaskId) -> Result<(Task, TaskAttempt)> {
        self.ensure_writable()?;
        let attempt = self.record.recover_interrupted(task_id, Utc::now())?;
        self.commit().await?;
        Ok((self.task(task_id)?, attempt))
    }

    async fn resolve(&mut self, task_id: &TaskId, decision: Decision) -> Result<TaskStatus> {
        self.ensure_writable()?;
        let status = match decision {
            Decision::Done => {
                self.record.mark_succeeded(task_id)?;
                TaskStatus::Succeeded
            }
            Decision::Retry => {
                self.record.mark_failed(task_id)?;
                TaskStatus::Failed
            }
            Decision::Escalate => {
                self.record.mark_escalated(task_id)?;
                TaskStatus::Escalated
            }
        };
        self.commit().await?;

        if status == TaskStatus::Succeeded {
            let phase = self.task(task_id)?.phase_name;
            while let Some(promoted) = self.record.promote_next_ready(&phase) {
                tracing::debug!("Task {} is ready", promoted);
                self.commit().await?;
            }
        }
        Ok(status)
    }

    async fn reopen(&mut self) -> Result<Vec<TaskId>> {
        self.ensure_writable()?;
        let requeued = self.record.reopen()?;
        self.commit().await?;
        Ok(requeued)
    }

    async fn block_phase(&mut self, index: usize) -> Result<()> {
        self.ensure_writable()?;
        self.record.block_phase(index)?;
        self.commit().await
    }

    async fn complete_phase(&mut self, index: usize) -> Result<()> {
        self.ensure_writable()?;
        self.record.complete_phase(index)?;
        self.commit().await
    }

    async fn finish_run(
        &mut self,
        status: RunStatus,
        failure: Option<String>,
        cancelled: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        self.record.finish_run(status, failure, cancelled);
        self.commit().await
    }

    fn task(&self, task_id: &TaskId) -> Result<Task> {
        self.record
            .task(task_id)
            .cloned()
            .ok_or_else(|| phasekit_core::PhaseKitError::TaskNotFound(task_id.clone()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use phasekit_core::{
        MemoryStateStore, PhaseKitError, PhaseSpec, RunId, RunSpec, TaskSpec,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> RunRecord {
        let spec = RunSpec::new(vec![PhaseSpec::new(
            "build",
            vec![TaskSpec::new("a"), TaskSpec::new("b").depends_on("a")],
        )]);
        RunRecord::new(RunId::new("ledger"), spec, Utc::now())
    }

    #[tokio::test]
    async fn test_transitions_are_persisted() {
        let store = MemoryStateStore::new();
        let ledger = LedgerHandle::spawn(record(), Arc::new(store.clone()));

        ledger.enter_phase(0, 3).await.unwrap();
        let (task, attempt) = ledger.start_attempt(TaskId::new("a")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(attempt.attempt_number, 1);

        let stored = store.load(&RunId::new("ledger")).await.unwrap().unwrap();
        assert_eq!(stored.task(&TaskId::new("a")).unwrap().status, TaskStatus::Running);
        assert_eq!(stored.attempts.len(), 1);

        ledger
            .finish_attempt(TaskId::new("a"), 1, Classification::success())
            .await
            .unwrap();
        let status = ledger.resolve(TaskId::new("a"), Decision::Done).await.unwrap();
        assert_eq!(status, TaskStatus::Succeeded);

        let stored = store.load(&RunId::new("ledger")).await.unwrap().unwrap();
        assert_eq!(stored.task(&TaskId::new("b")).unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let ledger = LedgerHandle::spawn(record(), Arc::new(MemoryStateStore::new()));
        ledger.enter_phase(0, 3).await.unwrap();

        let err = ledger.start_attempt(TaskId::new("b")).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(PhaseKitError::InvalidTransition { .. })
        ));
    }

    struct FailingStore {
        saves: AtomicUsize,
        fail_after: usize,
    }

    #[async_trait]
    impl StateStore for FailingStore {
        async fn save(&self, _record: &RunRecord) -> phasekit_core::Result<()> {
            if self.saves.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(PhaseKitError::Store("disk full".to_string()));
            }
            Ok(())
        }

        async fn load(&self, _run_id: &RunId) -> phasekit_core::Result<Option<RunRecord>> {
            Ok(None)
        }

        async fn archive(&self, _run_id: &RunId) -> phasekit_core::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_save_poisons_ledger() {
        let store = Arc::new(FailingStore {
            saves: AtomicUsize::new(0),
            fail_after: 1,
        });
        let ledger = LedgerHandle::spawn(record(), store.clone());

        ledger.enter_phase(0, 3).await.unwrap();
        let err = ledger.start_attempt(TaskId::new("a")).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));

        // Later transitions are refused without touching the store
        let err = ledger.checkpoint().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);

        // Snapshots still work for reporting
        let snapshot = ledger.snapshot().await.unwrap();
        assert_eq!(snapshot.attempts.len(), 1);
    }
}
