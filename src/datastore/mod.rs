//! Datastore Collaborators
//!
//! Narrow interfaces onto the content-addressed blob store (code packages)
//! and the per-task datastore (metadata records and logs).
//!
//! - [`BlobStore`]: stores packaged code, returns address + digest
//! - [`TaskDatastore`]: per-attempt storage the metadata bridge writes into
//! - [`local`]: filesystem implementations

pub mod local;

pub use local::{LocalBlobStore, LocalTaskDatastore};

use crate::error::Result;

/// Kind of backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreKind {
    Local,
    S3,
    Azure,
    Gs,
}

impl DatastoreKind {
    /// Returns true if tasks on other machines can read from this store.
    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl std::fmt::Display for DatastoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::S3 => write!(f, "s3"),
            Self::Azure => write!(f, "azure"),
            Self::Gs => write!(f, "gs"),
        }
    }
}

/// Location of one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub address: String,
    pub digest: String,
}

/// Content-addressed blob storage.
pub trait BlobStore: Send + Sync {
    /// Stores each blob and returns its location, in input order.
    ///
    /// Idempotent per distinct content. `len_hint` is the expected number
    /// of blobs.
    fn store(&self, blobs: &[&[u8]], len_hint: usize) -> Result<Vec<StoredBlob>>;

    fn kind(&self) -> DatastoreKind;
}

/// Storage scoped to one task of one run.
pub trait TaskDatastore: Send + Sync {
    fn run_id(&self) -> &str;
    fn step_name(&self) -> &str;
    fn task_id(&self) -> &str;

    /// Returns true if a metadata record with this name was saved.
    fn has_metadata(&self, name: &str) -> Result<bool>;

    /// Saves a metadata record.
    fn save_metadata(&self, name: &str, contents: &[u8]) -> Result<()>;

    /// Replaces the stored contents of a log stream.
    fn save_log(&self, stream: &str, contents: &[u8]) -> Result<()>;
}
