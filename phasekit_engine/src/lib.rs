//! phasekit engine - phased workflow orchestration.
//!
//! This crate drives a [`RunSpec`](phasekit_core::RunSpec) to completion:
//!
//! - Phases run strictly in declared order, one at a time
//! - Within a phase, ready tasks fan out to external collaborators through a bounded pool
//! - Failed attempts are retried up to each task's budget, then escalated
//! - Every state transition is persisted before the engine moves on
//!
//! See [`WorkflowEngine`] for the entry point.

use phasekit_core::{ComplexityClass, PhaseKitError, RunId};

pub mod workflow;

/// Error types for engine operations.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Error from the core crate (invalid spec, illegal transition, storage)
    #[error(transparent)]
    Core(#[from] PhaseKitError),

    /// No collaborator serves a complexity class used by the run
    #[error("No collaborator registered for complexity class '{0}'")]
    NoCollaborator(ComplexityClass),

    /// Resubmitted spec does not match the persisted run structure
    #[error("Run {0} was persisted with a different phase/task structure")]
    SpecChanged(RunId),

    /// A state transition could not be persisted
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// The run ledger stopped accepting transitions
    #[error("Run ledger closed")]
    LedgerClosed,

    /// Engine configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No persisted record for the run
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Operation requires a terminal run
    #[error("Run {0} has not reached a terminal status")]
    RunNotTerminal(RunId),

    /// A phase ended without completing, blocking or being cancelled
    #[error("Phase '{0}' stalled with no dispatchable tasks")]
    Stalled(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// Re-export the public surface
pub use workflow::cancellation::{CancellationToken, CancellationTokenSource};
pub use workflow::collaborator::{
    Classification, Collaborator, CollaboratorRegistry, InvocationContext, OutcomeClassifier,
    RawResult, ResultClassifier,
};
pub use workflow::config::{EngineConfig, TaskTimeout, TimeoutConfig};
pub use workflow::dispatcher::TaskDispatcher;
pub use workflow::engine::{EscalationReport, RunReport, WorkflowEngine};

#[cfg(test)]
mod tests {
    use super::*;
    use phasekit_core::TaskId;

    #[test]
    fn test_core_error_is_transparent() {
        let err: EngineError = PhaseKitError::TaskNotFound(TaskId::new("x")).into();
        assert_eq!(err.to_string(), "Task not found: x");
    }

    #[test]
    fn test_no_collaborator_display() {
        let err = EngineError::NoCollaborator(ComplexityClass::Complex);
        assert_eq!(
            err.to_string(),
            "No collaborator registered for complexity class 'complex'"
        );
    }
}
