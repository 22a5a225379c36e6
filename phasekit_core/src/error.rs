//! Error types for phasekit.

use crate::types::{TaskId, TaskStatus};

/// Main error type for the core crate.
///
/// All core operations return `Result<T> = std::result::Result<T, PhaseKitError>`.
#[derive(thiserror::Error, Debug)]
pub enum PhaseKitError {
    /// Run specification is malformed.
    #[error("Invalid run specification: {0}")]
    InvalidSpec(String),

    /// Cycle detected in a phase's dependency graph.
    #[error("Cycle detected in phase '{phase}' involving tasks: {tasks:?}")]
    CycleDetected {
        /// Phase containing the cycle
        phase: String,
        /// Tasks participating in the cycle
        tasks: Vec<TaskId>,
    },

    /// Dependency refers to a task that does not exist.
    #[error("Task {task} depends on unknown task {dependency}")]
    MissingDependency {
        /// Dependent task
        task: TaskId,
        /// Referenced task
        dependency: TaskId,
    },

    /// Dependency crosses a phase boundary.
    #[error("Task {task} in phase '{phase}' depends on {dependency} from another phase")]
    CrossPhaseDependency {
        /// Dependent task
        task: TaskId,
        /// Phase of the dependent task
        phase: String,
        /// Referenced task
        dependency: TaskId,
    },

    /// Task could not be found in the run.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Illegal task status change.
    #[error("Invalid transition for task {task}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Task being updated
        task: TaskId,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// Attempt budget already consumed.
    #[error("Task {task} has no attempts left ({max_attempts} allowed)")]
    AttemptsExhausted {
        /// Task being dispatched
        task: TaskId,
        /// Configured attempt budget
        max_attempts: u32,
    },

    /// Phase sequencing violated.
    #[error("Phase ordering violated: {0}")]
    PhaseOrder(String),

    /// Persisted record failed integrity checks.
    #[error("Run record corrupted: {0}")]
    Corrupted(String),

    /// Persisted record was written by a newer schema.
    #[error("Unsupported record schema version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Version found in storage
        found: u32,
        /// Newest version this build understands
        supported: u32,
    },

    /// Storage backend failure.
    #[error("State store error: {0}")]
    Store(String),

    /// Concurrency pool is closed.
    #[error("Concurrency pool closed")]
    PoolClosed,

    /// A pool lane terminated abnormally.
    #[error("Pool lane failed: {0}")]
    LaneFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Type alias for Result with PhaseKitError.
pub type Result<T> = std::result::Result<T, PhaseKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PhaseKitError::TaskNotFound(TaskId::new("codegen-users"));
        assert_eq!(err.to_string(), "Task not found: codegen-users");
    }

    #[test]
    fn test_transition_error_display() {
        let err = PhaseKitError::InvalidTransition {
            task: TaskId::new("t1"),
            from: TaskStatus::Succeeded,
            to: TaskStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for task t1: Succeeded -> Running"
        );
    }
}
