//! Metadata Bridge
//!
//! Inside a remote workload the local metadata store writes to the
//! container's filesystem, which nobody else can read. After the task
//! finishes, its records are copied into the task datastore so the local
//! metadata reader on the user's machine can pick them up.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::local::task_meta_dir;
use crate::datastore::local::list_file_names;
use crate::datastore::TaskDatastore;
use crate::error::Result;

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records copied into the task datastore
    pub copied: usize,
    /// Records already present there
    pub skipped: usize,
}

/// Copies a task's local metadata records into its datastore.
///
/// Records are keyed by name (attempt + field), so running this again for
/// the same task copies nothing new.
///
/// # Arguments
///
/// * `local_dir` - Root of the local metadata store
/// * `task_datastore` - Datastore of the finished task
pub fn sync_to_datastore(
    local_dir: &Path,
    task_datastore: &dyn TaskDatastore,
) -> Result<SyncReport> {
    let source = task_meta_dir(
        local_dir,
        task_datastore.run_id(),
        task_datastore.step_name(),
        task_datastore.task_id(),
    );

    let mut report = SyncReport::default();

    for name in list_file_names(&source)? {
        if task_datastore.has_metadata(&name)? {
            debug!("Metadata record {} already synced", name);
            report.skipped += 1;
            continue;
        }

        let contents = fs::read(source.join(&name))?;
        task_datastore.save_metadata(&name, &contents)?;
        report.copied += 1;
    }

    info!(
        "Synced metadata for {}/{}/{}: {} copied, {} already present",
        task_datastore.run_id(),
        task_datastore.step_name(),
        task_datastore.task_id(),
        report.copied,
        report.skipped
    );
    Ok(report)
}
