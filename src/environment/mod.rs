//! Environment Module
//!
//! Backend configuration and the execution mode of the current process.

pub mod config;
pub mod mode;

pub use config::{RemoteConfig, BACKEND_NAME, DATASTORE_LOCAL_DIR};
pub use mode::ExecutionMode;
