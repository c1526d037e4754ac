//! # canner
//!
//! A write-behind buffer that durably records a stream of timestamped, tagged
//! binary payloads into append-only, hourly bucket files.
//!
//! Producers hand records to a [`Canner`]; a single background worker drains
//! them every second (or on request, or on close) and appends each one, as a
//! single line of text, to the file of the UTC hour its timestamp falls in:
//!
//! ```text
//! <dir>/2024-08-03T00:00:00Z/2024-08-03T11:00:00Z.can
//! ```
//!
//! ```no_run
//! use canner::{Canner, Result};
//! use chrono::Utc;
//!
//! fn main() -> Result<()> {
//!     let canner = Canner::new("/var/lib/canner")?;
//!     canner.push(Utc::now(), "aprsis-raw", b"N0CALL>APRS:>hello".to_vec())?;
//!     canner.close()?;
//!     Ok(())
//! }
//! ```
//!
//! The crate emits `tracing` events but never installs a subscriber.

pub mod canner;
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;

pub use crate::canner::{bucket_path, Bucket, BucketLayout, Canner, WriteFailure};
pub use crate::config::{CannerConfig, FailurePolicy, DEFAULT_FILE_EXTENSION};
pub use crate::error::{CanError, Result};
pub use crate::metrics::{CannerMetrics, MetricsSnapshot};
pub use crate::record::{read_records, Record, LINE_SEPARATOR, RECORD_SEPARATOR};
