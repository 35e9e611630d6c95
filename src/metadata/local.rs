//! Local Metadata Store
//!
//! Writes each entry as a JSON record under
//! `<root>/<run>/<step>/<task>/_meta/<attempt>_<field>.json`. A record is
//! written once; registering the same field for the same attempt again
//! keeps the first record.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::{MetadataEntry, MetadataKind, MetadataStore};
use crate::datastore::local::META_DIR;
use crate::error::Result;

/// Filesystem-backed metadata store.
#[derive(Debug, Clone)]
pub struct LocalMetadataStore {
    root: PathBuf,
}

impl LocalMetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record file name for an entry.
    ///
    /// Bytes of the field outside `[A-Za-z0-9_-]` are written as `%XX`, so
    /// distinct fields never share a record.
    pub fn record_name(entry: &MetadataEntry) -> String {
        let mut field = String::with_capacity(entry.field.len());
        for byte in entry.field.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                field.push(char::from(byte));
            } else {
                field.push_str(&format!("%{:02X}", byte));
            }
        }
        format!("{}_{}.json", entry.attempt().unwrap_or(0), field)
    }

    /// Reads a task's records, sorted by record name.
    pub fn read_records(
        &self,
        run_id: &str,
        step_name: &str,
        task_id: &str,
    ) -> Result<Vec<MetadataEntry>> {
        let dir = task_meta_dir(&self.root, run_id, step_name, task_id);
        let mut entries = Vec::new();
        for name in crate::datastore::local::list_file_names(&dir)? {
            let content = fs::read_to_string(dir.join(name))?;
            entries.push(serde_json::from_str(&content)?);
        }
        Ok(entries)
    }
}

/// Directory of a task's local metadata records.
pub fn task_meta_dir(root: &Path, run_id: &str, step_name: &str, task_id: &str) -> PathBuf {
    root.join(run_id).join(step_name).join(task_id).join(META_DIR)
}

impl MetadataStore for LocalMetadataStore {
    fn register(
        &self,
        run_id: &str,
        step_name: &str,
        task_id: &str,
        entries: &[MetadataEntry],
    ) -> Result<()> {
        let dir = task_meta_dir(&self.root, run_id, step_name, task_id);
        fs::create_dir_all(&dir)?;

        for entry in entries {
            let path = dir.join(Self::record_name(entry));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(serde_json::to_string_pretty(entry)?.as_bytes())?;
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Metadata record {} already exists", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            "Registered {} metadata entries for {}/{}/{}",
            entries.len(),
            run_id,
            step_name,
            task_id
        );
        Ok(())
    }

    fn kind(&self) -> MetadataKind {
        MetadataKind::Local
    }
}
