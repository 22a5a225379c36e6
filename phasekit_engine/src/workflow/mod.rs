//! Workflow orchestration: phases, dispatch, retries and durable progress.
//!
//! # Architecture
//!
//! - [`WorkflowEngine`](engine::WorkflowEngine): iterates phases in order and reports the terminal status
//! - [`PhaseRunner`](phase::PhaseRunner): drives one phase until every task succeeds or one escalates
//! - [`TaskDispatcher`](dispatcher::TaskDispatcher): runs one attempt against a collaborator
//! - Run ledger: the single writer that applies transitions and persists after each one
//!
//! # Execution Model
//!
//! 1. Validate the run spec and the collaborator registry
//! 2. Load the persisted run or create a fresh one; recover interrupted attempts
//! 3. For each phase: enter (validate DAG, create tasks), dispatch ready tasks
//!    in creation order through the pool, apply the retry policy per attempt
//! 4. Stop at the first blocked phase (escalated), on cancellation (failed), or
//!    after the last phase (completed)

pub mod cancellation;
pub mod collaborator;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub(crate) mod ledger;
pub(crate) mod phase;
