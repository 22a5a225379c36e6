//! External collaborators and result classification.
//!
//! A [`Collaborator`] performs the actual work of a task. The engine
//! never interprets what it returns; an [`OutcomeClassifier`] supplied by
//! the caller maps each raw result to an [`AttemptOutcome`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phasekit_core::{AttemptOutcome, ComplexityClass, RunId, RunSpec, Task};
use serde_json::Value;

use super::cancellation::CancellationToken;
use crate::{EngineError, Result};

/// Opaque value returned by a collaborator.
pub type RawResult = Value;

/// Per-attempt information passed to a collaborator.
#[derive(Clone, Debug)]
pub struct InvocationContext {
    /// Run the task belongs to
    pub run_id: RunId,
    /// Name of the task's phase
    pub phase: String,
    /// 1-based attempt number
    pub attempt_number: u32,
    /// Time limit the engine enforces on this invocation
    pub timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl InvocationContext {
    pub(crate) fn new(
        run_id: RunId,
        phase: String,
        attempt_number: u32,
        timeout: Option<Duration>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            phase,
            attempt_number,
            timeout,
            cancellation,
        }
    }

    /// Token observing run cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true if the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Performs the work of a task.
///
/// Errors are not engine errors: they are handed to the classifier like any
/// other result and usually become a transient failure.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Executes one attempt of `task`.
    async fn invoke(&self, task: &Task, context: &InvocationContext) -> anyhow::Result<RawResult>;
}

/// Classified outcome of one attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// Outcome recorded on the attempt
    pub outcome: AttemptOutcome,
    /// Diagnostics kept with the attempt
    pub error_detail: Option<Value>,
}

impl Classification {
    /// A successful attempt with no detail.
    pub fn success() -> Self {
        Self {
            outcome: AttemptOutcome::Success,
            error_detail: None,
        }
    }

    /// A failure worth retrying.
    pub fn transient(detail: Value) -> Self {
        Self {
            outcome: AttemptOutcome::TransientFailure,
            error_detail: Some(detail),
        }
    }

    /// A failure that escalates without retrying.
    pub fn fatal(detail: Value) -> Self {
        Self {
            outcome: AttemptOutcome::FatalFailure,
            error_detail: Some(detail),
        }
    }
}

/// Maps a collaborator result to an attempt outcome.
///
/// Implemented for any `Fn(&Task, &anyhow::Result<RawResult>) -> Classification`.
pub trait OutcomeClassifier: Send + Sync {
    /// Classifies the result of one attempt of `task`.
    fn classify(&self, task: &Task, result: &anyhow::Result<RawResult>) -> Classification;
}

impl<F> OutcomeClassifier for F
where
    F: Fn(&Task, &anyhow::Result<RawResult>) -> Classification + Send + Sync,
{
    fn classify(&self, task: &Task, result: &anyhow::Result<RawResult>) -> Classification {
        self(task, result)
    }
}

/// Default classifier: `Ok` is a success, `Err` a transient failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResultClassifier;

impl OutcomeClassifier for ResultClassifier {
    fn classify(&self, _task: &Task, result: &anyhow::Result<RawResult>) -> Classification {
        match result {
            Ok(_) => Classification::success(),
            Err(e) => Classification::transient(serde_json::json!({ "error": format!("{:#}", e) })),
        }
    }
}

/// Collaborators keyed by the complexity class they serve.
#[derive(Clone, Default)]
pub struct CollaboratorRegistry {
    collaborators: HashMap<ComplexityClass, Arc<dyn Collaborator>>,
}

impl CollaboratorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the collaborator for `class`, replacing any previous one.
    pub fn register(&mut self, class: ComplexityClass, collaborator: Arc<dyn Collaborator>) {
        self.collaborators.insert(class, collaborator);
    }

    /// Returns the collaborator serving `class`.
    pub fn get(&self, class: ComplexityClass) -> Option<Arc<dyn Collaborator>> {
        self.collaborators.get(&class).cloned()
    }

    /// Checks that every class used by `spec` has a collaborator.
    pub fn ensure_covers(&self, spec: &RunSpec) -> Result<()> {
        let mut classes: Vec<ComplexityClass> = spec.complexity_classes().into_iter().collect();
        classes.sort_by_key(|c| c.to_string());
        match classes.into_iter().find(|c| !self.collaborators.contains_key(c)) {
            Some(missing) => Err(EngineError::NoCollaborator(missing)),
            None => Ok(()),
        }
    }

    /// Returns the number of registered classes.
    pub fn len(&self) -> usize {
        self.collaborators.len()
    }

    /// Returns true if no collaborator is registered.
    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }
}

impl fmt::Debug for CollaboratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<String> = self.collaborators.keys().map(|c| c.to_string()).collect();
        classes.sort();
        f.debug_struct("CollaboratorRegistry")
            .field("classes", &classes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasekit_core::{PhaseSpec, TaskSpec, TaskStatus, TaskId};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Collaborator for Echo {
        async fn invoke(&self, task: &Task, context: &InvocationContext) -> anyhow::Result<RawResult> {
            Ok(json!({ "task": task.id.as_str(), "attempt": context.attempt_number }))
        }
    }

    fn task() -> Task {
        Task {
            id: TaskId::new("t"),
            phase_name: "p".to_string(),
            depends_on: vec![],
            complexity_class: ComplexityClass::Simple,
            max_attempts: 3,
            status: TaskStatus::Running,
            payload: Value::Null,
        }
    }

    #[test]
    fn test_result_classifier() {
        let classifier = ResultClassifier;
        assert_eq!(
            classifier.classify(&task(), &Ok(json!(1))),
            Classification::success()
        );

        let failed = classifier.classify(&task(), &Err(anyhow::anyhow!("boom")));
        assert_eq!(failed.outcome, AttemptOutcome::TransientFailure);
        assert_eq!(failed.error_detail, Some(json!({ "error": "boom" })));
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |_: &Task, result: &anyhow::Result<RawResult>| match result {
            Ok(v) if v["status"] == "fatal" => Classification::fatal(v.clone()),
            Ok(_) => Classification::success(),
            Err(_) => Classification::transient(Value::Null),
        };

        let outcome = classifier.classify(&task(), &Ok(json!({ "status": "fatal" })));
        assert_eq!(outcome.outcome, AttemptOutcome::FatalFailure);
    }

    #[tokio::test]
    async fn test_collaborator_receives_context() {
        let source = super::super::cancellation::CancellationTokenSource::new();
        let context = InvocationContext::new(
            RunId::new("r"),
            "p".to_string(),
            2,
            None,
            source.token(),
        );
        let raw = Echo.invoke(&task(), &context).await.unwrap();
        assert_eq!(raw, json!({ "task": "t", "attempt": 2 }));

        assert!(!context.is_cancelled());
        source.cancel();
        assert!(context.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_registry_coverage() {
        let spec = RunSpec::new(vec![PhaseSpec::new(
            "p",
            vec![
                TaskSpec::new("a"),
                TaskSpec::new("b").with_class(ComplexityClass::Complex),
            ],
        )]);

        let mut registry = CollaboratorRegistry::new();
        registry.register(ComplexityClass::Simple, Arc::new(Echo));
        assert!(matches!(
            registry.ensure_covers(&spec),
            Err(EngineError::NoCollaborator(ComplexityClass::Complex))
        ));

        registry.register(ComplexityClass::Complex, Arc::new(Echo));
        assert!(registry.ensure_covers(&spec).is_ok());
        assert_eq!(registry.len(), 2);
    }
}
