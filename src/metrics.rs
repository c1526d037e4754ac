use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Counters describing what a canner has done so far
#[derive(Debug)]
pub struct CannerMetrics {
    // Record counts
    /// Records accepted by `push`
    records_pushed: AtomicUsize,
    /// Records appended to a bucket file
    records_written: AtomicUsize,
    /// Records dropped after a write failure
    records_failed: AtomicUsize,
    /// Write attempts that were retried
    write_retries: AtomicUsize,

    // Data metrics
    /// Total bytes appended, line terminators included
    bytes_written: AtomicUsize,

    // File handle metrics
    /// Bucket files opened
    files_opened: AtomicUsize,
    /// Handles closed to make room for another bucket
    handle_evictions: AtomicUsize,

    // Flush metrics
    /// Flushes that found at least one pending record
    flush_count: AtomicUsize,
    /// Total flush duration in nanoseconds
    flush_duration_ns: AtomicU64,
    /// Largest batch taken by a single flush
    largest_batch: AtomicUsize,
    /// Duration of the most recent non-empty flush
    last_flush_duration: Mutex<Duration>,

    /// Start time of the metrics collector
    start_time: Instant,
}

/// Point-in-time copy of [`CannerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_pushed: usize,
    pub records_written: usize,
    pub records_failed: usize,
    pub write_retries: usize,
    pub bytes_written: usize,
    pub files_opened: usize,
    pub handle_evictions: usize,
    pub flush_count: usize,
    pub largest_batch: usize,
    pub flush_duration: Duration,
    pub last_flush_duration: Duration,
}

impl MetricsSnapshot {
    /// Records pushed but neither written nor dropped yet
    pub fn records_pending(&self) -> usize {
        self.records_pushed
            .saturating_sub(self.records_written + self.records_failed)
    }
}

impl Default for CannerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CannerMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            records_pushed: AtomicUsize::new(0),
            records_written: AtomicUsize::new(0),
            records_failed: AtomicUsize::new(0),
            write_retries: AtomicUsize::new(0),
            bytes_written: AtomicUsize::new(0),
            files_opened: AtomicUsize::new(0),
            handle_evictions: AtomicUsize::new(0),
            flush_count: AtomicUsize::new(0),
            flush_duration_ns: AtomicU64::new(0),
            largest_batch: AtomicUsize::new(0),
            last_flush_duration: Mutex::new(Duration::ZERO),
            start_time: Instant::now(),
        }
    }

    /// Increment pushed records
    pub fn increment_pushed(&self) {
        self.records_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful append of `bytes` bytes
    pub fn record_write(&self, bytes: usize) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Increment dropped records
    pub fn increment_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment retried writes
    pub fn increment_retries(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment opened files
    pub fn increment_files_opened(&self) {
        self.files_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment evicted handles
    pub fn increment_evictions(&self) {
        self.handle_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a flush of `batch` records that took `duration`
    pub fn record_flush(&self, batch: usize, duration: Duration) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        self.flush_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.largest_batch.fetch_max(batch, Ordering::Relaxed);
        *self.last_flush_duration.lock() = duration;
    }

    /// Get number of pushed records
    pub fn get_records_pushed(&self) -> usize {
        self.records_pushed.load(Ordering::Relaxed)
    }

    /// Get number of written records
    pub fn get_records_written(&self) -> usize {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Get number of dropped records
    pub fn get_records_failed(&self) -> usize {
        self.records_failed.load(Ordering::Relaxed)
    }

    /// Get total bytes written
    pub fn get_bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Get number of non-empty flushes
    pub fn get_flush_count(&self) -> usize {
        self.flush_count.load(Ordering::Relaxed)
    }

    /// Get average flush duration
    pub fn get_avg_flush_duration(&self) -> Duration {
        let count = self.flush_count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.flush_duration_ns.load(Ordering::Relaxed) / count as u64)
    }

    /// Get uptime of the metrics collector
    pub fn get_uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a consistent-enough copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_pushed: self.records_pushed.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            files_opened: self.files_opened.load(Ordering::Relaxed),
            handle_evictions: self.handle_evictions.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
            flush_duration: Duration::from_nanos(self.flush_duration_ns.load(Ordering::Relaxed)),
            last_flush_duration: *self.last_flush_duration.lock(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.records_pushed.store(0, Ordering::Relaxed);
        self.records_written.store(0, Ordering::Relaxed);
        self.records_failed.store(0, Ordering::Relaxed);
        self.write_retries.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.files_opened.store(0, Ordering::Relaxed);
        self.handle_evictions.store(0, Ordering::Relaxed);
        self.flush_count.store(0, Ordering::Relaxed);
        self.flush_duration_ns.store(0, Ordering::Relaxed);
        self.largest_batch.store(0, Ordering::Relaxed);
        *self.last_flush_duration.lock() = Duration::ZERO;
    }
}
