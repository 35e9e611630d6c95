//! Workflow Data Model
//!
//! Step nodes, their execution modifiers, and the per-attempt task identity
//! handed to the lifecycle hooks.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: TrainFlow
//! steps:
//!   - name: start
//!     next: [train]
//!
//!   - name: train
//!     previous: [start]
//!     modifiers:
//!       - name: armada
//!       - name: catch
//! ```

use serde::{Deserialize, Serialize};

/// Modifier names that select a remote compute backend.
pub const REMOTE_BACKENDS: &[&str] = &["armada", "batch", "kubernetes"];

/// An execution modifier attached to a step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Modifier {
    /// Modifier name (e.g., "armada", "kubernetes", "catch", "retry")
    pub name: String,

    /// Marks a remote backend not listed in [`REMOTE_BACKENDS`]
    #[serde(default)]
    pub remote: bool,

    /// Whether this backend can run parallel/multi-node steps
    #[serde(default)]
    pub supports_parallel: bool,
}

impl Modifier {
    /// Creates a plain (non-backend) modifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote: false,
            supports_parallel: false,
        }
    }

    /// Creates a remote compute backend modifier.
    pub fn remote_backend(name: impl Into<String>, supports_parallel: bool) -> Self {
        Self {
            name: name.into(),
            remote: true,
            supports_parallel,
        }
    }

    /// Returns true if this modifier selects a remote compute backend.
    pub fn is_remote_backend(&self) -> bool {
        self.remote || REMOTE_BACKENDS.contains(&self.name.as_str())
    }
}

/// A single node of the workflow graph.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StepDefinition {
    /// Unique step name
    pub name: String,

    /// Step requires parallel/multi-node execution
    #[serde(default)]
    pub parallel: bool,

    /// Execution modifiers, in declaration order
    #[serde(default)]
    pub modifiers: Vec<Modifier>,

    /// Steps that must complete before this one
    #[serde(default)]
    pub previous: Vec<String>,

    /// Steps that follow this one
    #[serde(default)]
    pub next: Vec<String>,
}

impl StepDefinition {
    /// Creates a step with no modifiers and no edges.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            parallel: false,
            modifiers: Vec::new(),
            previous: Vec::new(),
            next: Vec::new(),
        }
    }

    /// Attaches a modifier.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Marks the step as requiring parallel execution.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.previous.push(step.into());
        self
    }

    /// Returns a copy whose `backend` modifiers also carry the backend's
    /// configured parallel capability.
    pub fn with_backend_capability(&self, backend: &Modifier) -> Self {
        let mut step = self.clone();
        for modifier in step.modifiers.iter_mut().filter(|m| m.name == backend.name) {
            modifier.remote |= backend.remote;
            modifier.supports_parallel |= backend.supports_parallel;
        }
        step
    }

    /// Returns the remote backend modifiers attached to this step.
    pub fn remote_backends(&self) -> Vec<&Modifier> {
        self.modifiers
            .iter()
            .filter(|m| m.is_remote_backend())
            .collect()
    }
}

/// A workflow graph: named collection of step nodes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Workflow {
    /// Flow name
    #[serde(default)]
    pub name: String,

    /// Step nodes
    pub steps: Vec<StepDefinition>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Adds a step to the workflow.
    pub fn add_step(&mut self, step: StepDefinition) -> Result<(), String> {
        if self.steps.iter().any(|s| s.name == step.name) {
            return Err(format!("Step '{}' already exists", step.name));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Gets a step by name.
    pub fn get_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Identity of one task attempt, borrowed from the workflow engine.
///
/// Hooks read it for the duration of a call and never keep it.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub run_id: &'a str,
    pub step_name: &'a str,
    pub task_id: &'a str,
    /// Zero-based attempt number
    pub retry_count: u32,
    /// Attempts that may still run user code remotely
    pub max_user_code_retries: u32,
    pub node: &'a StepDefinition,
}

impl<'a> StepContext<'a> {
    /// Returns true while the attempt is within the remote retry budget.
    pub fn within_remote_budget(&self) -> bool {
        self.retry_count <= self.max_user_code_retries
    }

    /// Tag used on every metadata entry of this attempt.
    pub fn attempt_tag(&self) -> String {
        format!("attempt_id:{}", self.retry_count)
    }
}

/// Terminal state of a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

impl ExecutionOutcome {
    /// Classifies an attempt from the engine's view of it.
    pub fn classify(task_ok: bool, retry_count: u32, max_retries: u32) -> Self {
        if task_ok {
            Self::Succeeded
        } else if retry_count < max_retries {
            Self::FailedRetryable
        } else {
            Self::FailedTerminal
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::FailedRetryable => write!(f, "failed_retryable"),
            Self::FailedTerminal => write!(f, "failed_terminal"),
        }
    }
}
