//! Package Cache
//!
//! Every task attempt of a run executes the same packaged code, so the
//! package is uploaded once per run and the resulting reference is shared.
//! The cache is a single-entry slot owned by the run and handed to each
//! step's dispatcher. Concurrent first callers block on the same slot;
//! exactly one of them performs the upload.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use once_cell::sync::OnceCell;

use crate::datastore::BlobStore;
use crate::error::{ConfigurationError, Error, Result};

/// Packaged user code for a run. Immutable and cheap to clone.
#[derive(Clone, PartialEq, Eq)]
pub struct PackageArtifact {
    blob: Arc<[u8]>,
}

impl PackageArtifact {
    pub fn new(blob: impl Into<Vec<u8>>) -> Self {
        let blob: Vec<u8> = blob.into();
        Self {
            blob: Arc::from(blob),
        }
    }

    /// Reads a package archive from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(fs::read(path)?))
    }

    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }
}

impl fmt::Debug for PackageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageArtifact")
            .field("len", &self.blob.len())
            .finish()
    }
}

/// Durable pointer to an uploaded package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub address: String,
    pub digest: String,
}

/// Single-entry, at-most-once package upload cache for one run.
#[derive(Debug)]
pub struct PackageCache {
    run_id: String,
    reference: OnceCell<PackageReference>,
    uploads: AtomicUsize,
}

impl PackageCache {
    /// Creates an empty cache for a run.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            reference: OnceCell::new(),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the run's package reference, uploading it on first access.
    ///
    /// If the upload fails the cache stays empty, so a later caller retries.
    ///
    /// # Errors
    ///
    /// * [`Error::PackageUploadFailed`] - the blob store rejected the upload
    /// * [`ConfigurationError::Invalid`] - `run_id` belongs to another run
    pub fn acquire_reference(
        &self,
        run_id: &str,
        artifact: &PackageArtifact,
        store: &dyn BlobStore,
    ) -> Result<PackageReference> {
        if run_id != self.run_id {
            return Err(ConfigurationError::Invalid(format!(
                "package cache for run '{}' used for run '{}'",
                self.run_id, run_id
            ))
            .into());
        }

        let reference = self
            .reference
            .get_or_try_init(|| self.upload(artifact, store))?;
        Ok(reference.clone())
    }

    /// Returns the cached reference without uploading.
    pub fn cached(&self) -> Option<PackageReference> {
        self.reference.get().cloned()
    }

    /// Number of uploads attempted so far, including failed ones.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn upload(
        &self,
        artifact: &PackageArtifact,
        store: &dyn BlobStore,
    ) -> Result<PackageReference> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        info!(
            "Uploading code package for run '{}' ({} bytes)",
            self.run_id,
            artifact.len()
        );

        let stored = store.store(&[artifact.blob()], 1).map_err(|e| {
            warn!("Package upload for run '{}' failed: {}", self.run_id, e);
            Error::PackageUploadFailed {
                run_id: self.run_id.clone(),
                reason: e.to_string(),
            }
        })?;

        let blob = stored.into_iter().next().ok_or_else(|| Error::PackageUploadFailed {
            run_id: self.run_id.clone(),
            reason: "blob store returned no location".to_string(),
        })?;

        debug!("Package for run '{}' stored at {}", self.run_id, blob.address);
        Ok(PackageReference {
            address: blob.address,
            digest: blob.digest,
        })
    }
}
