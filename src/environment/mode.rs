//! Execution Mode
//!
//! Whether the current process is the Armada workload itself or the local
//! runtime that launches it. The dispatcher receives this as a value; only
//! the binary reads it from the process environment.

use std::collections::HashMap;

/// Set inside Armada containers.
pub const WORKLOAD_ENV_VAR: &str = "ARMADA_STEP_WORKLOAD";

/// Armada job id, when the container exposes it.
pub const JOB_ID_ENV_VAR: &str = "ARMADA_JOB_ID";

/// Where the current task attempt is executing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Local runtime, or local fallback after the remote budget ran out
    #[default]
    Local,
    /// Inside the remote Armada workload
    Remote { job_id: Option<String> },
}

impl ExecutionMode {
    /// Reads the mode from the process environment.
    ///
    /// Only the two mode variables are read, so unrelated non-UTF-8
    /// variables don't matter. A non-UTF-8 job id is treated as unknown.
    pub fn from_env() -> Self {
        let mut vars = HashMap::new();
        if std::env::var_os(WORKLOAD_ENV_VAR).is_some() {
            vars.insert(WORKLOAD_ENV_VAR.to_string(), String::new());
        }
        if let Ok(job_id) = std::env::var(JOB_ID_ENV_VAR) {
            vars.insert(JOB_ID_ENV_VAR.to_string(), job_id);
        }
        Self::from_vars(&vars)
    }

    /// Reads the mode from a variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        if !vars.contains_key(WORKLOAD_ENV_VAR) {
            return Self::Local;
        }
        let job_id = vars
            .get(JOB_ID_ENV_VAR)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        Self::Remote { job_id }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Armada job id, if running remotely and known.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Remote { job_id } => job_id.as_deref(),
            Self::Local => None,
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote { .. } => write!(f, "remote"),
        }
    }
}
