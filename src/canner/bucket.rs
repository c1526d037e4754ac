//! Hourly bucket layout
//!
//! Maps a record timestamp to the file it is canned into. A bucket covers
//! one UTC hour; in the nested layout the hour files of a day share a
//! directory named after the start of that day.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CanError, Result};

/// Directory layout of bucket files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketLayout {
    /// `<base>/<day start>/<hour start><ext>`
    #[default]
    Nested,
    /// `<base>/<hour start><ext>`
    Flat,
}

impl fmt::Display for BucketLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketLayout::Nested => write!(f, "nested"),
            BucketLayout::Flat => write!(f, "flat"),
        }
    }
}

impl FromStr for BucketLayout {
    type Err = CanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nested" => Ok(Self::Nested),
            "flat" => Ok(Self::Flat),
            _ => Err(CanError::config(format!("Unknown bucket layout: {}", s))),
        }
    }
}

/// The UTC hour a timestamp falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket {
    day: DateTime<Utc>,
    hour: DateTime<Utc>,
}

impl Bucket {
    /// Find the bucket containing `timestamp`
    pub fn of(timestamp: &DateTime<Utc>) -> Self {
        let day = timestamp.date_naive().and_time(NaiveTime::MIN).and_utc();
        let hour = day + ChronoDuration::hours(timestamp.hour() as i64);
        Self { day, hour }
    }

    /// Start of the day containing the bucket
    pub fn day_start(&self) -> DateTime<Utc> {
        self.day
    }

    /// Start of the bucket's hour
    pub fn start(&self) -> DateTime<Utc> {
        self.hour
    }

    /// First instant after the bucket, or `None` for the last representable hour
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.hour.checked_add_signed(ChronoDuration::hours(1))
    }

    /// Check if a timestamp is in this bucket's hour
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.hour && self.end().map_or(true, |end| *timestamp < end)
    }

    /// Path of the bucket file under `base_dir`
    pub fn path(&self, base_dir: &Path, layout: BucketLayout, extension: &str) -> PathBuf {
        let file_name = format!("{}{}", format_instant(&self.hour), extension);
        match layout {
            BucketLayout::Nested => base_dir.join(format_instant(&self.day)).join(file_name),
            BucketLayout::Flat => base_dir.join(file_name),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_instant(&self.hour))
    }
}

/// Get the path of the bucket file a timestamp belongs to
pub fn bucket_path(
    base_dir: &Path,
    layout: BucketLayout,
    extension: &str,
    timestamp: &DateTime<Utc>,
) -> PathBuf {
    Bucket::of(timestamp).path(base_dir, layout, extension)
}

fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}
