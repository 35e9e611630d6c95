//! Workflow Definition Module
//!
//! Step nodes, the modifiers attached to them, and the graph-init checks
//! that run before any task exists.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (StepDefinition, Modifier, StepContext)
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Backend conflict and parallelism checks

pub mod model;
pub mod parser;
pub mod validator;

pub use model::{ExecutionOutcome, Modifier, StepContext, StepDefinition, Workflow};
pub use parser::{load_workflow, parse_workflow};
pub use validator::{validate_modifiers, validate_step};
