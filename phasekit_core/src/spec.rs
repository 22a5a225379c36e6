//! Declarative run specification.
//!
//! A [`RunSpec`] lists the phases of a run in order, each with its tasks,
//! intra-phase dependencies, complexity class and optional attempt budget.
//! Specifications can be written in YAML or JSON:
//!
//! ```yaml
//! id: build-users-api
//! phases:
//!   - name: codegen
//!     tasks:
//!       - id: models
//!       - id: handlers
//!         depends_on: [models]
//!         complexity_class: complex
//!         max_attempts: 5
//!   - name: test
//!     tasks:
//!       - id: unit-tests
//! ```

use crate::dag::PhaseGraph;
use crate::error::{PhaseKitError, Result};
use crate::types::{ComplexityClass, RunId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Attempt budget for tasks without an explicit override.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Complete description of a run, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Optional run id; a fresh id is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Phases in execution order
    pub phases: Vec<PhaseSpec>,
}

/// One phase of a run specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Unique phase name
    pub name: String,
    /// Tasks in creation order
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// One task of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task identifier (unique across the whole run)
    pub id: TaskId,
    /// Tasks of the same phase that must succeed first
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Worker tier
    #[serde(default)]
    pub complexity_class: ComplexityClass,
    /// Attempt budget override
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Opaque input forwarded to the collaborator
    #[serde(default)]
    pub payload: Value,
}

impl TaskSpec {
    /// Creates a task spec with defaults.
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            complexity_class: ComplexityClass::default(),
            max_attempts: None,
            payload: Value::Null,
        }
    }

    /// Adds a dependency.
    pub fn depends_on(mut self, dep: impl Into<TaskId>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Sets the complexity class.
    pub fn with_class(mut self, class: ComplexityClass) -> Self {
        self.complexity_class = class;
        self
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Sets the collaborator payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

impl PhaseSpec {
    /// Creates a phase spec.
    pub fn new(name: impl Into<String>, tasks: Vec<TaskSpec>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }
}

impl RunSpec {
    /// Creates a run spec from phases.
    pub fn new(phases: Vec<PhaseSpec>) -> Self {
        Self { id: None, phases }
    }

    /// Sets a fixed run id (required to resume a run).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parses a specification from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parses a specification from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a specification from a `.yaml`/`.yml` or `.json` file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(PhaseKitError::InvalidSpec(format!(
                "Unsupported spec file extension: {:?}",
                other
            ))),
        }
    }

    /// Returns the run id, generating one if the spec has none.
    pub fn run_id(&self) -> RunId {
        match &self.id {
            Some(id) => RunId::new(id.clone()),
            None => RunId::generate(),
        }
    }

    /// Returns the phase with the given name.
    pub fn phase(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Returns every complexity class referenced by the spec.
    pub fn complexity_classes(&self) -> HashSet<ComplexityClass> {
        self.phases
            .iter()
            .flat_map(|p| p.tasks.iter().map(|t| t.complexity_class))
            .collect()
    }

    /// Validates the whole specification.
    ///
    /// Checks, in order: run id, non-empty and unique phase names, unique
    /// task ids, attempt budgets, dependency targets and acyclicity of
    /// every phase graph.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.id {
            if !RunId::new(id.clone()).is_storage_safe() {
                return Err(PhaseKitError::InvalidSpec(format!(
                    "Run id '{}' must use only [A-Za-z0-9._-]",
                    id
                )));
            }
        }

        if self.phases.is_empty() {
            return Err(PhaseKitError::InvalidSpec("Run has no phases".to_string()));
        }

        let mut phase_names = HashSet::new();
        let mut task_phase: HashMap<&TaskId, &str> = HashMap::new();

        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(PhaseKitError::InvalidSpec(
                    "Phase name cannot be empty".to_string(),
                ));
            }
            if !phase_names.insert(phase.name.as_str()) {
                return Err(PhaseKitError::InvalidSpec(format!(
                    "Duplicate phase name: {}",
                    phase.name
                )));
            }
            for task in &phase.tasks {
                if task.id.as_str().is_empty() {
                    return Err(PhaseKitError::InvalidSpec(format!(
                        "Task with empty id in phase '{}'",
                        phase.name
                    )));
                }
                if task.max_attempts == Some(0) {
                    return Err(PhaseKitError::InvalidSpec(format!(
                        "Task {} must allow at least one attempt",
                        task.id
                    )));
                }
                if task_phase.insert(&task.id, phase.name.as_str()).is_some() {
                    return Err(PhaseKitError::InvalidSpec(format!(
                        "Duplicate task id: {}",
                        task.id
                    )));
                }
            }
        }

        for phase in &self.phases {
            for task in &phase.tasks {
                for dep in &task.depends_on {
                    match task_phase.get(dep) {
                        None => {
                            return Err(PhaseKitError::MissingDependency {
                                task: task.id.clone(),
                                dependency: dep.clone(),
                            })
                        }
                        Some(dep_phase) if *dep_phase != phase.name => {
                            return Err(PhaseKitError::CrossPhaseDependency {
                                task: task.id.clone(),
                                phase: phase.name.clone(),
                                dependency: dep.clone(),
                            })
                        }
                        Some(_) => {}
                    }
                }
            }
            PhaseGraph::build(phase)?;
        }

        Ok(())
    }

    /// SHA-256 over the run structure (phase names, task ids, dependency edges).
    ///
    /// Attempt budgets and payloads are excluded so a caller can raise
    /// `max_attempts` before resuming an escalated run.
    pub fn structure_checksum(&self) -> String {
        let structure: Vec<(&str, Vec<(&TaskId, &[TaskId])>)> = self
            .phases
            .iter()
            .map(|phase| {
                let tasks = phase
                    .tasks
                    .iter()
                    .map(|t| (&t.id, t.depends_on.as_slice()))
                    .collect();
                (phase.name.as_str(), tasks)
            })
            .collect();

        let json = serde_json::to_vec(&structure).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&json);
        format!("{:x}", hasher.finalize())
    }
}
