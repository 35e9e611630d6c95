//! Remote Backend Configuration
//!
//! Connection and job-identity settings for the Armada backend, loaded
//! from YAML.
//!
//! # Example YAML Format
//!
//! ```yaml
//! host: armada.internal
//! port: 50051
//! namespace: ml-{run_id}
//! job_set: "{run_id}-{step}"
//! job_file: jobs/{step}.yaml
//! log_sidecar: true
//! log_files: [stdout.log, stderr.log]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};
use crate::workflow::Modifier;

/// Environment variable overriding the local datastore directory.
pub const DATASTORE_LOCAL_DIR_VAR: &str = "ARMADA_STEP_DATASTORE_LOCAL_DIR";

/// Name of the backend modifier this crate implements.
pub const BACKEND_NAME: &str = "armada";

/// Lazily-resolved directory holding local datastore and metadata records.
pub static DATASTORE_LOCAL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    // Priority 1: explicit override
    if let Ok(dir) = std::env::var(DATASTORE_LOCAL_DIR_VAR) {
        if !dir.trim().is_empty() {
            let path = PathBuf::from(dir);
            info!("Using local datastore dir from environment: {}", path.display());
            return path;
        }
    }

    // Priority 2: current working directory
    let cwd_path = PathBuf::from(".armada-step");
    info!("Using CWD local datastore dir: {}", cwd_path.display());
    cwd_path
});

/// Settings for dispatching steps to Armada.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Armada server host
    #[serde(default = "default_host")]
    pub host: String,

    /// Armada server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Armada queue namespace. Supports task placeholders.
    pub namespace: String,

    /// Job-set name. Supports task placeholders.
    pub job_set: String,

    /// Job descriptor reference. Supports task placeholders.
    pub job_file: String,

    /// Replaces the first entrypoint element; the current executable when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,

    /// Whether the backend can run parallel/multi-node steps
    #[serde(default)]
    pub supports_parallel: bool,

    /// Reject local blob stores instead of warning
    #[serde(default)]
    pub require_remote_datastore: bool,

    /// Forward task logs to the task datastore while the step runs
    #[serde(default)]
    pub log_sidecar: bool,

    /// Interval between log forwarding passes
    #[serde(default = "default_sidecar_interval_ms")]
    pub sidecar_interval_ms: u64,

    /// Task log files forwarded by the sidecar
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_files: Vec<PathBuf>,

    /// Directory of local metadata records; [`DATASTORE_LOCAL_DIR`] when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_metadata_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_sidecar_interval_ms() -> u64 {
    1000
}

impl RemoteConfig {
    /// Creates a configuration with default connection settings.
    pub fn new(
        namespace: impl Into<String>,
        job_set: impl Into<String>,
        job_file: impl Into<String>,
    ) -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            namespace: namespace.into(),
            job_set: job_set.into(),
            job_file: job_file.into(),
            entrypoint: None,
            supports_parallel: false,
            require_remote_datastore: false,
            log_sidecar: false,
            sidecar_interval_ms: default_sidecar_interval_ms(),
            log_files: Vec::new(),
            local_metadata_dir: None,
        }
    }

    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        info!("Loaded remote config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: RemoteConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Checks required settings.
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        let required = [
            ("host", &self.host),
            ("namespace", &self.namespace),
            ("job_set", &self.job_set),
            ("job_file", &self.job_file),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::Invalid(format!("'{}' must not be empty", name)));
            }
        }
        if self.port == 0 {
            return Err(ConfigurationError::Invalid("'port' must not be 0".to_string()));
        }
        if self.sidecar_interval_ms == 0 {
            return Err(ConfigurationError::Invalid(
                "'sidecar_interval_ms' must not be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Modifier descriptor for this backend.
    pub fn modifier(&self) -> Modifier {
        Modifier::remote_backend(BACKEND_NAME, self.supports_parallel)
    }

    /// Sidecar forwarding interval.
    pub fn sidecar_interval(&self) -> Duration {
        Duration::from_millis(self.sidecar_interval_ms)
    }

    /// Directory holding local metadata records.
    pub fn metadata_dir(&self) -> PathBuf {
        self.local_metadata_dir
            .clone()
            .unwrap_or_else(|| DATASTORE_LOCAL_DIR.clone())
    }
}
