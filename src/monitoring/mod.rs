//! Task Monitoring Module
//!
//! Log forwarding for running tasks, and the helper used for operations
//! whose failure must never affect the task outcome.
//!
//! # Components
//!
//! - [`LogSidecar`]: periodically copies task log files into the task datastore
//! - [`best_effort`]: runs an operation and discards its error

pub mod sidecar;

pub use sidecar::LogSidecar;

use log::debug;

use crate::error::Result;

/// Runs `op`, logging and discarding any error.
///
/// Returns true if the operation succeeded.
pub fn best_effort<F>(what: &str, op: F) -> bool
where
    F: FnOnce() -> Result<()>,
{
    match op() {
        Ok(()) => true,
        Err(e) => {
            debug!("Best-effort '{}' failed (ignored): {}", what, e);
            false
        }
    }
}
