//! Step Modifier Validation
//!
//! Runs once per step at graph-initialization time, before any task is
//! created:
//! - At most one remote compute backend may be attached to a step
//! - A step that needs parallel execution must use a backend that supports it

use log::debug;

use super::model::{Modifier, StepDefinition};
use crate::error::ConfigurationError;

/// Validates the backend modifiers attached to a step.
///
/// # Arguments
///
/// * `step` - Step name, used in error messages
/// * `modifiers` - Modifiers attached to the step, in declaration order
/// * `requires_parallel` - Whether the step needs parallel/multi-node execution
///
/// # Errors
///
/// * [`ConfigurationError::ConflictingBackends`] - two or more remote backends
/// * [`ConfigurationError::UnsupportedParallelism`] - the selected backend
///   can't run a parallel step
pub fn validate_modifiers(
    step: &str,
    modifiers: &[Modifier],
    requires_parallel: bool,
) -> Result<(), ConfigurationError> {
    let backends: Vec<&Modifier> = modifiers.iter().filter(|m| m.is_remote_backend()).collect();
    check_backends(step, &backends, requires_parallel)
}

/// Validates a step node using its own modifiers and parallel flag.
pub fn validate_step(step: &StepDefinition) -> Result<(), ConfigurationError> {
    check_backends(&step.name, &step.remote_backends(), step.parallel)
}

fn check_backends(
    step: &str,
    backends: &[&Modifier],
    requires_parallel: bool,
) -> Result<(), ConfigurationError> {
    if backends.len() > 1 {
        return Err(ConfigurationError::ConflictingBackends {
            step: step.to_string(),
            backends: backends.iter().map(|m| m.name.clone()).collect(),
        });
    }

    let Some(backend) = backends.first() else {
        debug!("Step '{}' has no remote backend modifier", step);
        return Ok(());
    };

    if requires_parallel && !backend.supports_parallel {
        return Err(ConfigurationError::UnsupportedParallelism {
            step: step.to_string(),
            backend: backend.name.clone(),
        });
    }

    debug!("Step '{}' validated for backend '{}'", step, backend.name);
    Ok(())
}
