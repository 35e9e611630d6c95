//! Filesystem Datastores
//!
//! Blobs live under `<root>/data/<digest[..2]>/<digest>`; task records
//! under `<root>/<run>/<step>/<task>/{_meta,_logs}/`.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};

use super::{BlobStore, DatastoreKind, StoredBlob, TaskDatastore};
use crate::error::Result;

/// Directory name for metadata records inside a task directory.
pub const META_DIR: &str = "_meta";

/// Directory name for log streams inside a task directory.
pub const LOGS_DIR: &str = "_logs";

/// Content-addressed blob store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a blob with this digest is stored at.
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        let shard = &digest[..digest.len().min(2)];
        self.root.join("data").join(shard).join(digest)
    }
}

/// Hex SHA-256 digest of a blob.
pub fn content_digest(blob: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(blob);
    format!("{:x}", hasher.finalize())
}

impl BlobStore for LocalBlobStore {
    fn store(&self, blobs: &[&[u8]], len_hint: usize) -> Result<Vec<StoredBlob>> {
        let mut stored = Vec::with_capacity(len_hint.max(blobs.len()));

        for blob in blobs {
            let digest = content_digest(blob);
            let path = self.blob_path(&digest);

            if path.exists() {
                debug!("Blob {} already stored", digest);
            } else {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, blob)?;
                debug!("Stored blob {} ({} bytes)", digest, blob.len());
            }

            stored.push(StoredBlob {
                address: format!("file://{}", path.display()),
                digest,
            });
        }

        Ok(stored)
    }

    fn kind(&self) -> DatastoreKind {
        DatastoreKind::Local
    }
}

/// Task datastore on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalTaskDatastore {
    root: PathBuf,
    run_id: String,
    step_name: String,
    task_id: String,
}

impl LocalTaskDatastore {
    pub fn new(
        root: impl Into<PathBuf>,
        run_id: impl Into<String>,
        step_name: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            run_id: run_id.into(),
            step_name: step_name.into(),
            task_id: task_id.into(),
        }
    }

    /// Directory holding this task's records.
    pub fn task_dir(&self) -> PathBuf {
        self.root
            .join(&self.run_id)
            .join(&self.step_name)
            .join(&self.task_id)
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.task_dir().join(META_DIR).join(name)
    }

    /// Lists saved metadata record names, sorted.
    pub fn metadata_names(&self) -> Result<Vec<String>> {
        list_file_names(&self.task_dir().join(META_DIR))
    }

    /// Reads a saved log stream.
    pub fn read_log(&self, stream: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.task_dir().join(LOGS_DIR).join(stream))?)
    }
}

impl TaskDatastore for LocalTaskDatastore {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn step_name(&self) -> &str {
        &self.step_name
    }

    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn has_metadata(&self, name: &str) -> Result<bool> {
        Ok(self.meta_path(name).exists())
    }

    fn save_metadata(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.meta_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn save_log(&self, stream: &str, contents: &[u8]) -> Result<()> {
        let dir = self.task_dir().join(LOGS_DIR);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(stream), contents)?;
        Ok(())
    }
}

/// Sorted names of the regular files in a directory; empty if it doesn't exist.
pub(crate) fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
