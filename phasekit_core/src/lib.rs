//! phasekit core - data model and scheduling primitives for phase/task workflows.
//!
//! This crate provides the building blocks the engine drives:
//!
//! - Run specification parsing and validation ([`spec`])
//! - Intra-phase dependency graphs ([`dag`])
//! - The run/phase/task/attempt state machine ([`model`])
//! - Bounded retry decisions ([`retry`])
//! - A bounded concurrency pool ([`pool`])
//! - Durable, versioned run storage ([`store`])

pub mod dag;
pub mod error;
pub mod model;
pub mod pool;
pub mod retry;
pub mod spec;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{PhaseKitError, Result};
pub use model::{Phase, RunRecord, Task, TaskAttempt, WorkflowRun};
pub use pool::{ConcurrencyPool, PoolHandle};
pub use retry::{BackoffConfig, Decision, RetryPolicy};
pub use spec::{PhaseSpec, RunSpec, TaskSpec, DEFAULT_MAX_ATTEMPTS};
pub use store::{FileStateStore, MemoryStateStore, RecordEnvelope, StateStore, SCHEMA_VERSION};
pub use types::{
    AttemptOutcome, ComplexityClass, PhaseStatus, RunId, RunStatus, TaskId, TaskStatus,
};
