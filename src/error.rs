//! Error Types
//!
//! Configuration problems are detected at graph-initialization time and
//! abort the run before any task is created. Everything else surfaces
//! while a task attempt moves through its lifecycle hooks.

use thiserror::Error;

use crate::execution::lifecycle::LifecycleState;

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Step configuration problems detected before any task is created.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// More than one remote compute backend is attached to a step.
    #[error(
        "Step '{step}' is marked for execution on more than one remote compute backend ({}). Please only use one.",
        .backends.join(", ")
    )]
    ConflictingBackends { step: String, backends: Vec<String> },

    /// The step needs parallel/multi-node execution the backend can't provide.
    #[error("Step '{step}' requires parallel execution but backend '{backend}' does not support it")]
    UnsupportedParallelism { step: String, backend: String },

    /// Remote tasks cannot read packages from a local blob store.
    #[error("Step '{step}' runs remotely and needs a shared datastore, but the '{kind}' datastore is configured")]
    LocalDatastore { step: String, kind: String },

    /// The step is not a node of the workflow graph.
    #[error("Step '{0}' is not part of the workflow graph")]
    UnknownStep(String),

    /// Malformed or inconsistent settings.
    #[error("Invalid remote configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the remote step lifecycle.
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal configuration error; the run must not start.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Uploading the code package failed. The cache stays empty.
    #[error("Failed to upload package for run '{run_id}': {reason}")]
    PackageUploadFailed { run_id: String, reason: String },

    /// A hook was invoked before the state it depends on existed.
    #[error("Hook '{hook}' invoked in state '{state}' before {requires}")]
    LifecycleOrdering {
        hook: &'static str,
        state: LifecycleState,
        requires: &'static str,
    },

    /// Log sidecar failure. Only ever reported through `best_effort`.
    #[error("Log sidecar error: {0}")]
    Sidecar(String),

    /// Collaborator store failure.
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns true for errors that must abort the run before any task starts.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
