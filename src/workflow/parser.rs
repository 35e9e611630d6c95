//! Workflow Parser
//!
//! Loads flow definitions from YAML and links step edges. Edges may be
//! declared from either side (`previous` or `next`); both lists are
//! completed after parsing.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::Workflow;
use crate::error::{ConfigurationError, Result};

/// Loads and links a workflow from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use armada_step::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("flow.yaml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path)?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_workflow(&yaml_content)
}

/// Parses and links a workflow from YAML text.
pub fn parse_workflow(yaml_content: &str) -> Result<Workflow> {
    let mut workflow: Workflow = serde_yaml::from_str(yaml_content)?;

    if workflow.is_empty() {
        return Err(ConfigurationError::Invalid("Workflow has no steps".to_string()).into());
    }

    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if step.name.trim().is_empty() {
            return Err(
                ConfigurationError::Invalid("Step has empty or whitespace-only name".to_string())
                    .into(),
            );
        }
        if !seen.insert(step.name.as_str()) {
            return Err(
                ConfigurationError::Invalid(format!("Duplicate step name: '{}'", step.name)).into(),
            );
        }
    }

    link_edges(&mut workflow)?;

    info!(
        "Parsed workflow '{}' with {} steps",
        workflow.name,
        workflow.steps.len()
    );
    Ok(workflow)
}

/// Completes `previous`/`next` so every edge is visible from both ends.
fn link_edges(workflow: &mut Workflow) -> Result<()> {
    let names: HashSet<String> = workflow.steps.iter().map(|s| s.name.clone()).collect();

    let mut edges = Vec::new();
    for step in &workflow.steps {
        for prev in &step.previous {
            if !names.contains(prev) {
                return Err(ConfigurationError::Invalid(format!(
                    "Step '{}' references unknown dependency: '{}'",
                    step.name, prev
                ))
                .into());
            }
            edges.push((prev.clone(), step.name.clone()));
        }
        for next in &step.next {
            if !names.contains(next) {
                return Err(ConfigurationError::Invalid(format!(
                    "Step '{}' references unknown dependent: '{}'",
                    step.name, next
                ))
                .into());
            }
            edges.push((step.name.clone(), next.clone()));
        }
    }

    for (from, to) in edges {
        for step in &mut workflow.steps {
            if step.name == from && !step.next.contains(&to) {
                step.next.push(to.clone());
            }
            if step.name == to && !step.previous.contains(&from) {
                step.previous.push(from.clone());
            }
        }
    }

    debug!("Linked edges for {} steps", workflow.steps.len());
    Ok(())
}
