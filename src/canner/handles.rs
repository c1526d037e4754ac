//! Open bucket file handles owned by the worker
//!
//! Handles are keyed by bucket path and kept in least-recently-used order,
//! so records that arrive slightly out of order do not force a reopen on
//! every write. With a capacity of one this degenerates to the classic
//! "one file open at a time" behavior.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{CanError, Result};
use crate::metrics::CannerMetrics;

struct OpenBucket {
    path: PathBuf,
    file: File,
}

/// Small LRU of append-mode bucket files
pub(crate) struct HandleCache {
    capacity: usize,
    /// Least recently used first
    open: Vec<OpenBucket>,
    metrics: Option<Arc<CannerMetrics>>,
}

impl HandleCache {
    pub(crate) fn new(capacity: usize, metrics: Option<Arc<CannerMetrics>>) -> Self {
        Self {
            capacity: capacity.max(1),
            open: Vec::with_capacity(capacity.max(1)),
            metrics,
        }
    }

    /// Get the handle for `path`, opening it and evicting the least recently
    /// used handle if needed.
    pub(crate) fn get(&mut self, path: &Path) -> Result<&mut File> {
        match self.open.iter().position(|b| b.path == path) {
            Some(idx) => {
                let bucket = self.open.remove(idx);
                self.open.push(bucket);
            }
            None => {
                // Open before evicting so a failed open leaves the cache intact
                let file = open_append(path)?;
                if let Some(metrics) = &self.metrics {
                    metrics.increment_files_opened();
                }

                if self.open.len() >= self.capacity {
                    let evicted = self.open.remove(0);
                    debug!(path = %evicted.path.display(), "closing bucket file");
                    if let Some(metrics) = &self.metrics {
                        metrics.increment_evictions();
                    }
                }

                debug!(path = %path.display(), "opened bucket file");
                self.open.push(OpenBucket {
                    path: path.to_path_buf(),
                    file,
                });
            }
        }

        // Just pushed, so never empty
        match self.open.last_mut() {
            Some(bucket) => Ok(&mut bucket.file),
            None => Err(CanError::bucket(path, "handle cache lost its entry")),
        }
    }

    /// Drop the handle for `path`, if open
    pub(crate) fn discard(&mut self, path: &Path) {
        self.open.retain(|b| b.path != path);
    }

    /// Close every open handle
    pub(crate) fn close_all(&mut self) {
        for bucket in self.open.drain(..) {
            debug!(path = %bucket.path.display(), "closing bucket file");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self, path: &Path) -> bool {
        self.open.iter().any(|b| b.path == path)
    }
}

/// Open a bucket file for appending, creating it and its directory
fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CanError::bucket(parent, format!("Failed to create bucket directory: {}", e))
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CanError::bucket(path, format!("Failed to open bucket file: {}", e)))
}
