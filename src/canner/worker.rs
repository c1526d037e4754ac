//! The background worker
//!
//! The worker is the only thread that touches bucket files. It sleeps until
//! either the flush ticker fires or a producer sends a command, drains the
//! whole pending queue, and appends every record to its bucket.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::bucket::bucket_path;
use super::handles::HandleCache;
use super::WriteFailure;
use crate::config::{CannerConfig, FailurePolicy};
use crate::error::{CanError, Result};
use crate::metrics::CannerMetrics;
use crate::record::{Record, LINE_SEPARATOR};

/// Records waiting for the next flush
#[derive(Debug)]
pub(crate) struct Pending {
    pub(crate) records: Vec<Record>,
    /// Cleared once close has begun; pushes are refused from then on
    pub(crate) open: bool,
}

impl Pending {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
            open: true,
        }
    }
}

/// Requests a producer can make of the worker; each carries its reply channel
pub(crate) enum Command {
    /// Flush now and acknowledge
    Flush(Sender<()>),
    /// Flush one last time, release every file, acknowledge and exit
    Close(Sender<()>),
}

pub(crate) struct Worker {
    base_dir: PathBuf,
    config: CannerConfig,
    pending: Arc<Mutex<Pending>>,
    handles: HandleCache,
    failures: Sender<WriteFailure>,
    metrics: Option<Arc<CannerMetrics>>,
    /// Reused encode buffer
    line: Vec<u8>,
}

impl Worker {
    pub(crate) fn new(
        base_dir: PathBuf,
        config: CannerConfig,
        pending: Arc<Mutex<Pending>>,
        failures: Sender<WriteFailure>,
        metrics: Option<Arc<CannerMetrics>>,
    ) -> Self {
        let handles = HandleCache::new(config.max_open_files, metrics.clone());
        Self {
            base_dir,
            config,
            pending,
            handles,
            failures,
            metrics,
            line: Vec::with_capacity(4096),
        }
    }

    /// Run until a close command arrives or every command sender is gone
    pub(crate) fn run(mut self, commands: Receiver<Command>) {
        let ticker = channel::tick(self.config.flush_interval());
        info!(
            base_dir = %self.base_dir.display(),
            interval_ms = self.config.flush_interval_ms,
            policy = %self.config.failure_policy,
            "canner worker started"
        );

        loop {
            select! {
                recv(ticker) -> _ => {
                    self.flush();
                }
                recv(commands) -> command => match command {
                    Ok(Command::Flush(ack)) => {
                        self.flush();
                        let _ = ack.send(());
                    }
                    Ok(Command::Close(ack)) => {
                        self.flush();
                        self.handles.close_all();
                        let _ = ack.send(());
                        break;
                    }
                    Err(_) => {
                        warn!("canner dropped without close, flushing remaining records");
                        self.flush();
                        self.handles.close_all();
                        break;
                    }
                },
            }
        }

        info!(base_dir = %self.base_dir.display(), "canner worker stopped");
    }

    /// Take every pending record and write it. Returns the batch size.
    pub(crate) fn flush(&mut self) -> usize {
        // Hold the lock only for the swap
        let batch = {
            let mut pending = self.pending.lock();
            if pending.records.is_empty() {
                return 0;
            }
            std::mem::take(&mut pending.records)
        };

        let start = Instant::now();
        let count = batch.len();
        for record in batch {
            self.write(record);
        }
        let duration = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.record_flush(count, duration);
        }
        debug!(
            records = count,
            open_files = self.handles.len(),
            elapsed_us = duration.as_micros() as u64,
            "flushed batch"
        );

        count
    }

    /// Append one record to its bucket, applying the failure policy
    fn write(&mut self, record: Record) {
        let path = bucket_path(
            &self.base_dir,
            self.config.layout,
            &self.config.file_extension,
            &record.timestamp,
        );
        let policy = self.config.failure_policy;
        let max_attempts = policy.max_attempts();

        let mut attempt = 1;
        loop {
            match self.try_write(&path, &record) {
                Ok(bytes) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_write(bytes);
                    }
                    return;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "bucket write failed, retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.increment_retries();
                    }
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    self.fail(record, path, e);
                    return;
                }
            }
        }
    }

    fn try_write(&mut self, path: &Path, record: &Record) -> Result<usize> {
        self.line.clear();
        record.encode_into(&mut self.line)?;
        self.line.push(LINE_SEPARATOR);

        let file = self.handles.get(path)?;
        if let Err(e) = file.write_all(&self.line) {
            // The handle may hold a partial line; start over with a fresh one
            self.handles.discard(path);
            return Err(CanError::bucket(path, format!("Failed to append record: {}", e)));
        }

        Ok(self.line.len())
    }

    fn fail(&mut self, record: Record, path: PathBuf, error: CanError) {
        error!(
            path = %path.display(),
            record = %record,
            policy = %self.config.failure_policy,
            error = %error,
            "failed to can record"
        );

        if self.config.failure_policy == FailurePolicy::Abort {
            std::process::abort();
        }

        if let Some(metrics) = &self.metrics {
            metrics.increment_failed();
        }
        match self.failures.try_send(WriteFailure {
            record,
            path,
            error,
        }) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!("failure channel full, dropping failure report");
            }
        }
    }
}
