//! Log Forwarding Sidecar
//!
//! A background thread that copies task log files into the task datastore
//! while the step runs, with one final pass on shutdown.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::datastore::TaskDatastore;
use crate::error::{Error, Result};

/// How often the worker checks the stop flag while waiting.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on how long `terminate` waits for the final pass.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running log forwarder.
pub struct LogSidecar {
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    stop_timeout: Duration,
}

impl LogSidecar {
    /// Starts forwarding `log_files` into `task_datastore` every `interval`.
    pub fn start(
        task_datastore: Arc<dyn TaskDatastore>,
        log_files: Vec<PathBuf>,
        interval: Duration,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (tx, done) = channel();

        let handle = thread::Builder::new()
            .name("log-sidecar".to_string())
            .spawn(move || {
                loop {
                    forward_logs(task_datastore.as_ref(), &log_files);
                    if wait_for_stop(&stop_flag, interval) {
                        break;
                    }
                }
                forward_logs(task_datastore.as_ref(), &log_files);
                let _ = tx.send(());
            })?;

        info!("Log sidecar started (interval: {:?})", interval);
        Ok(Self {
            stop,
            done,
            handle: Some(handle),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        })
    }

    /// Sets the bound on how long `terminate` waits.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Stops forwarding after one final pass.
    ///
    /// Waits at most the stop timeout; a worker that doesn't finish in time
    /// is left detached.
    pub fn terminate(mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);

        match self.done.recv_timeout(self.stop_timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    handle
                        .join()
                        .map_err(|_| Error::Sidecar("log sidecar thread panicked".to_string()))?;
                }
                info!("Log sidecar stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::Sidecar(format!(
                "log sidecar did not stop within {:?}",
                self.stop_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Sidecar("log sidecar exited unexpectedly".to_string()))
            }
        }
    }
}

/// Sleeps up to `interval`, returning early with true once stop is requested.
fn wait_for_stop(stop: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        thread::sleep(STOP_CHECK_INTERVAL.min(interval));
    }
    stop.load(Ordering::Relaxed)
}

/// Copies every existing log file into the datastore under its file name.
fn forward_logs(task_datastore: &dyn TaskDatastore, log_files: &[PathBuf]) {
    for path in log_files {
        let Some(stream) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.exists() {
            continue;
        }

        match fs::read(path) {
            Ok(contents) => {
                if let Err(e) = task_datastore.save_log(stream, &contents) {
                    warn!("Failed to forward log {}: {}", path.display(), e);
                } else {
                    debug!("Forwarded {} bytes of {}", contents.len(), stream);
                }
            }
            Err(e) => warn!("Failed to read log {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::LocalTaskDatastore;
    use tempfile::tempdir;

    #[test]
    fn test_sidecar_forwards_on_terminate() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("stdout.log");
        fs::write(&log_path, "starting").unwrap();

        let ds = Arc::new(LocalTaskDatastore::new(temp_dir.path().join("ds"), "R1", "train", "1"));
        let sidecar =
            LogSidecar::start(ds.clone(), vec![log_path.clone()], Duration::from_secs(60)).unwrap();

        fs::write(&log_path, "starting\ndone").unwrap();
        sidecar.terminate().unwrap();

        assert_eq!(ds.read_log("stdout.log").unwrap(), b"starting\ndone");
    }

    #[test]
    fn test_sidecar_forwards_periodically() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("stderr.log");
        fs::write(&log_path, "warning").unwrap();

        let ds = Arc::new(LocalTaskDatastore::new(temp_dir.path().join("ds"), "R1", "train", "1"));
        let sidecar =
            LogSidecar::start(ds.clone(), vec![log_path], Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ds.read_log("stderr.log").is_err() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ds.read_log("stderr.log").unwrap(), b"warning");

        sidecar.terminate().unwrap();
    }

    #[test]
    fn test_sidecar_ignores_missing_files() {
        let temp_dir = tempdir().unwrap();
        let ds = Arc::new(LocalTaskDatastore::new(temp_dir.path(), "R1", "train", "1"));

        let sidecar = LogSidecar::start(
            ds.clone(),
            vec![temp_dir.path().join("missing.log")],
            Duration::from_millis(10),
        )
        .unwrap()
        .with_stop_timeout(Duration::from_secs(2));

        assert!(sidecar.terminate().is_ok());
        assert!(ds.read_log("missing.log").is_err());
    }
}
