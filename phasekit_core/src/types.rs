//! Core identifiers and status enums shared across phasekit.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a workflow run.
///
/// Run ids double as storage keys, so they are restricted to ASCII
/// alphanumerics plus `-`, `_` and `.`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a RunId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random run id.
    pub fn generate() -> Self {
        Self(format!("run-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is usable as a storage key.
    pub fn is_storage_safe(&self) -> bool {
        !self.0.is_empty()
            && !self.0.starts_with('.')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a task within a run.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new TaskId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is in progress (or resumable)
    Running,
    /// Every phase completed
    Completed,
    /// Engine failure or cancellation
    Failed,
    /// A phase blocked on escalated tasks
    Escalated,
}

impl RunStatus {
    /// Returns true for statuses that end an invocation of the engine.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Status of a phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not entered yet
    Pending,
    /// Tasks are being dispatched
    Active,
    /// Every task succeeded
    Completed,
    /// At least one task escalated
    Blocked,
}

/// Status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies
    Blocked,
    /// Dependencies satisfied, not dispatched yet
    Ready,
    /// An attempt is in flight
    Running,
    /// Terminal success
    Succeeded,
    /// Last attempt failed, queued for another attempt
    Failed,
    /// Terminal failure, needs external intervention
    Escalated,
}

impl TaskStatus {
    /// Returns true if the task can be handed to a dispatcher.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskStatus::Ready | TaskStatus::Failed)
    }

    /// Returns true if the forward state machine allows `self -> next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Blocked, Ready)
                | (Ready, Running)
                | (Failed, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Escalated)
        )
    }
}

/// Worker tier used to pick a collaborator for a task.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    /// Cheap, fast worker
    #[default]
    Simple,
    /// Expensive, capable worker
    Complex,
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplexityClass::Simple => write!(f, "simple"),
            ComplexityClass::Complex => write!(f, "complex"),
        }
    }
}

/// Classified outcome of one task attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Collaborator finished the work
    Success,
    /// Worth retrying
    TransientFailure,
    /// Will fail identically every time
    FatalFailure,
}
