//! ArmadaStep - Remote Step Execution on Armada
//!
//! Lifecycle hooks that let a workflow engine run individual steps on the
//! Armada batch scheduler instead of locally. The code package is uploaded
//! once per run, each task attempt's command is rewritten into an Armada
//! submission, and metadata recorded inside the remote workload is copied
//! back where the local reader can find it.
//!
//! # Architecture
//!
//! - [`workflow`]: Step nodes, modifiers and graph-init validation
//! - [`execution`]: Package cache, command builder, lifecycle hooks, local driver
//! - [`environment`]: Backend configuration and execution mode
//! - [`datastore`]: Blob and task datastore interfaces, filesystem implementations
//! - [`metadata`]: Metadata entries, local store and the datastore bridge
//! - [`monitoring`]: Log forwarding sidecar
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use armada_step::environment::RemoteConfig;
//! use armada_step::execution::Engine;
//! use armada_step::load_workflow;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the flow and the backend settings
//!     let workflow = load_workflow("flow.yaml")?;
//!     let config = RemoteConfig::load("armada.yaml")?;
//!
//!     // Plan four attempts of the "train" step
//!     let mut engine = Engine::new(Arc::new(workflow), "train", config);
//!     engine.set_splits(4);
//!
//!     for attempt in engine.run()? {
//!         println!("{}", attempt.command);
//!     }
//!     Ok(())
//! }
//! ```

pub mod datastore;
pub mod environment;
pub mod error;
pub mod execution;
pub mod metadata;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use error::{ConfigurationError, Error, Result};
pub use execution::engine::Engine;
pub use execution::lifecycle::LifecycleHookDispatcher;
pub use workflow::model::{StepDefinition, Workflow};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ArmadaStep";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "ArmadaStep");
    }

    #[test]
    fn test_module_exports_step() {
        let step = StepDefinition::new("train");
        assert_eq!(step.name, "train");
        assert!(step.modifiers.is_empty());
    }

    #[test]
    fn test_module_exports_workflow() {
        let workflow = Workflow::new("Empty");
        assert!(workflow.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
