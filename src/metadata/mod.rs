//! Task Metadata
//!
//! Bookkeeping observations about task attempts and the stores that
//! record them.
//!
//! - [`MetadataEntry`]: one append-only observation
//! - [`MetadataStore`]: the run bookkeeping service interface
//! - [`local`]: filesystem store used when no metadata service is configured
//! - [`bridge`]: copies local records into the task datastore

pub mod bridge;
pub mod local;

pub use bridge::{sync_to_datastore, SyncReport};
pub use local::LocalMetadataStore;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Prefix of the tag carrying the attempt number.
pub const ATTEMPT_TAG_PREFIX: &str = "attempt_id:";

/// One observation about a task attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub field: String,
    pub value: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Milliseconds since the Unix epoch
    pub ts_epoch: i64,
}

impl MetadataEntry {
    /// Creates an entry whose type is its field name, timestamped now.
    pub fn new(field: impl Into<String>, value: impl Into<String>, tags: Vec<String>) -> Self {
        let field = field.into();
        Self {
            entry_type: field.clone(),
            field,
            value: value.into(),
            tags,
            ts_epoch: Utc::now().timestamp_millis(),
        }
    }

    /// Attempt number from the `attempt_id:<n>` tag, if present.
    pub fn attempt(&self) -> Option<u32> {
        self.tags
            .iter()
            .find_map(|tag| tag.strip_prefix(ATTEMPT_TAG_PREFIX))
            .and_then(|n| n.parse().ok())
    }
}

/// Kind of metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    /// Records written to the local filesystem
    Local,
    /// Records sent to a metadata service
    Service,
}

impl std::fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// Run bookkeeping store.
pub trait MetadataStore: Send + Sync {
    /// Registers entries for a task. Entries are never mutated afterwards.
    fn register(
        &self,
        run_id: &str,
        step_name: &str,
        task_id: &str,
        entries: &[MetadataEntry],
    ) -> Result<()>;

    fn kind(&self) -> MetadataKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_defaults_to_field() {
        let entry = MetadataEntry::new("attempt-id", "2", vec!["attempt_id:2".to_string()]);
        assert_eq!(entry.entry_type, "attempt-id");
        assert_eq!(entry.attempt(), Some(2));
        assert!(entry.ts_epoch > 0);
    }

    #[test]
    fn test_entry_without_attempt_tag() {
        let entry = MetadataEntry::new("armada-job-id", "job-1", vec!["other".to_string()]);
        assert_eq!(entry.attempt(), None);
    }

    #[test]
    fn test_entry_serializes_type_key() {
        let entry = MetadataEntry::new("attempt-id", "0", Vec::new());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "attempt-id");
        assert_eq!(json["field"], "attempt-id");
    }
}
