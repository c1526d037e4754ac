//! Write-behind canning of records into hourly bucket files
//!
//! A [`Canner`] accepts records from any number of producer threads and hands
//! them to a single background worker. The worker flushes on a fixed
//! interval, on request, and once more when the canner is closed; every
//! record is appended to the bucket file of the hour its timestamp falls in.

mod bucket;
mod handles;
mod worker;

pub use bucket::{bucket_path, Bucket, BucketLayout};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, TimeZone};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::CannerConfig;
use crate::error::{CanError, Result};
use crate::metrics::{CannerMetrics, MetricsSnapshot};
use crate::record::Record;
use worker::{Command, Pending, Worker};

/// Failure reports kept for producers before new ones are dropped
const FAILURE_CHANNEL_CAPACITY: usize = 1024;

/// A record the worker could not write, and why
#[derive(Debug)]
pub struct WriteFailure {
    /// The record that was dropped
    pub record: Record,
    /// The bucket file it was meant for
    pub path: PathBuf,
    /// What went wrong
    pub error: CanError,
}

/// Buffers records in memory and cans them into bucket files in the background
pub struct Canner {
    /// Base directory for bucket files
    base_dir: PathBuf,
    /// Canner configuration
    config: CannerConfig,
    /// Records waiting for the worker
    pending: Arc<Mutex<Pending>>,
    /// Command channel to the worker
    commands: Sender<Command>,
    /// Failures reported by the worker
    failures: Receiver<WriteFailure>,
    /// Metrics collector
    metrics: Arc<CannerMetrics>,
    /// Worker thread, taken by close
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Canner {
    /// Create a canner with default configuration
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_config(dir, CannerConfig::default())
    }

    /// Create a canner with custom configuration.
    ///
    /// Starts the worker thread; no files or directories are touched until
    /// the first flush.
    pub fn with_config<P: AsRef<Path>>(dir: P, config: CannerConfig) -> Result<Self> {
        config.validate()?;

        let base_dir = dir.as_ref().to_path_buf();
        let pending = Arc::new(Mutex::new(Pending::new()));
        let metrics = Arc::new(CannerMetrics::new());
        let (command_tx, command_rx) = channel::unbounded();
        let (failure_tx, failure_rx) = channel::bounded(FAILURE_CHANNEL_CAPACITY);

        let worker = Worker::new(
            base_dir.clone(),
            config.clone(),
            pending.clone(),
            failure_tx,
            config.collect_metrics.then(|| metrics.clone()),
        );
        let handle = thread::Builder::new()
            .name("canner-worker".to_string())
            .spawn(move || worker.run(command_rx))
            .map_err(|e| CanError::worker(format!("Failed to spawn worker thread: {}", e)))?;

        Ok(Self {
            base_dir,
            config,
            pending,
            commands: command_tx,
            failures: failure_rx,
            metrics,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a record for canning.
    ///
    /// Never blocks on I/O and does not validate the record; records that
    /// cannot be encoded are reported by the worker at flush time.
    pub fn push<Tz: TimeZone>(
        &self,
        timestamp: DateTime<Tz>,
        description: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.push_record(Record::new(timestamp, description, payload))
    }

    /// Queue an already built record.
    ///
    /// Fails with [`CanError::Closed`] once [`close`](Self::close) has begun.
    pub fn push_record(&self, record: Record) -> Result<()> {
        {
            let mut pending = self.pending.lock();
            if !pending.open {
                return Err(CanError::Closed);
            }
            pending.records.push(record);
        }

        if self.config.collect_metrics {
            self.metrics.increment_pushed();
        }
        Ok(())
    }

    /// Ask the worker to flush now and wait until it has.
    ///
    /// Everything pushed before the call has been handed to the OS when this
    /// returns, apart from records reported through
    /// [`take_failures`](Self::take_failures).
    pub fn flush(&self) -> Result<()> {
        // Serialized with close so the worker is alive to answer
        let worker = self.worker.lock();
        if worker.is_none() {
            return Err(CanError::Closed);
        }

        let (ack_tx, ack_rx) = channel::bounded(1);
        self.commands
            .send(Command::Flush(ack_tx))
            .map_err(|_| CanError::worker("worker is not running"))?;
        ack_rx
            .recv()
            .map_err(|_| CanError::worker("worker exited before acknowledging flush"))
    }

    /// Stop accepting records, flush everything pending, and release all files.
    ///
    /// Blocks until the worker has finished its final flush. Calling close
    /// again is a no-op.
    pub fn close(&self) -> Result<()> {
        // Held for the whole close so concurrent callers wait for the first
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return Ok(());
        };

        self.pending.lock().open = false;

        let (ack_tx, ack_rx) = channel::bounded(1);
        if self.commands.send(Command::Close(ack_tx)).is_err() {
            let _ = handle.join();
            return Err(CanError::worker("worker is not running"));
        }
        let acked = ack_rx.recv();

        if handle.join().is_err() {
            return Err(CanError::worker("worker thread panicked"));
        }
        acked.map_err(|_| CanError::worker("worker exited before acknowledging close"))?;

        info!(base_dir = %self.base_dir.display(), "canner closed");
        Ok(())
    }

    /// Check if the canner still accepts records
    pub fn is_open(&self) -> bool {
        self.pending.lock().open
    }

    /// Number of records waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().records.len()
    }

    /// Path of the bucket file a record is canned into
    pub fn filename(&self, record: &Record) -> PathBuf {
        bucket_path(
            &self.base_dir,
            self.config.layout,
            &self.config.file_extension,
            &record.timestamp,
        )
    }

    /// Drain the failures the worker has reported so far
    pub fn take_failures(&self) -> Vec<WriteFailure> {
        self.failures.try_iter().collect()
    }

    /// Get a snapshot of the canner's metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Get the canner's base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the canner's configuration
    pub fn config(&self) -> &CannerConfig {
        &self.config
    }
}

impl Drop for Canner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(base_dir = %self.base_dir.display(), error = %e, "Error closing canner");
        }
    }
}
