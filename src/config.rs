//! Configuration for the canner
//!
//! This module provides configuration options for a [`Canner`](crate::Canner):
//! how often it flushes, how bucket files are laid out, how many files it
//! keeps open, and what it does when a write fails.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::canner::BucketLayout;
use crate::error::{CanError, Result};

/// Default extension of bucket files
pub const DEFAULT_FILE_EXTENSION: &str = ".can";

/// What the worker does when a record cannot be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailurePolicy {
    /// Log the failure and abort the whole process
    Abort,
    /// Report the failure, drop the record, and keep writing the batch
    Skip,
    /// Retry I/O failures with linear backoff, then behave like `Skip`
    Retry {
        /// Total number of attempts, including the first one
        max_attempts: u32,
        /// Delay before the second attempt; grows linearly afterwards
        backoff_ms: u64,
    },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Skip
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Skip => write!(f, "skip"),
            Self::Retry {
                max_attempts,
                backoff_ms,
            } => write!(f, "retry({} attempts, {}ms backoff)", max_attempts, backoff_ms),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = CanError;

    /// Parse `abort`, `skip` or `retry`; `retry` gets three attempts 100ms apart
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            "retry" => Ok(Self::Retry {
                max_attempts: 3,
                backoff_ms: 100,
            }),
            _ => Err(CanError::config(format!("Unknown failure policy: {}", s))),
        }
    }
}

impl FailurePolicy {
    /// Get the name of the policy
    pub fn name(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
            Self::Retry { .. } => "retry",
        }
    }

    /// Number of attempts a write gets under this policy
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Retry { max_attempts, .. } => *max_attempts,
            _ => 1,
        }
    }

    /// Delay before the given retry (1-based), zero for other policies
    pub fn backoff(&self, retry: u32) -> Duration {
        match self {
            Self::Retry { backoff_ms, .. } => Duration::from_millis(backoff_ms * retry as u64),
            _ => Duration::ZERO,
        }
    }
}

/// Configuration options for a canner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CannerConfig {
    /// Interval between scheduled flushes, in milliseconds
    pub flush_interval_ms: u64,
    /// Directory layout of bucket files
    pub layout: BucketLayout,
    /// Extension appended to every bucket file name
    pub file_extension: String,
    /// Number of bucket files the worker keeps open at once
    pub max_open_files: usize,
    /// What to do when a record cannot be written
    pub failure_policy: FailurePolicy,
    /// Enable metrics collection
    pub collect_metrics: bool,
}

impl Default for CannerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            layout: BucketLayout::default(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            max_open_files: 1,
            failure_policy: FailurePolicy::default(),
            collect_metrics: true,
        }
    }
}

impl CannerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interval between scheduled flushes
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the bucket file layout
    pub fn with_layout(mut self, layout: BucketLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the bucket file extension, including the leading dot
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Set how many bucket files may be open at once
    pub fn with_max_open_files(mut self, count: usize) -> Self {
        self.max_open_files = count;
        self
    }

    /// Set the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set whether to collect metrics
    pub fn with_collect_metrics(mut self, collect: bool) -> Self {
        self.collect_metrics = collect;
        self
    }

    /// Get the flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_ms < 1 {
            return Err(CanError::config("Flush interval must be at least 1ms"));
        }

        if self.max_open_files < 1 {
            return Err(CanError::config("Max open files must be at least 1"));
        }

        if !self.file_extension.starts_with('.') || self.file_extension.len() < 2 {
            return Err(CanError::config(format!(
                "File extension must start with a dot and be non-empty: {:?}",
                self.file_extension
            )));
        }

        if self
            .file_extension
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(CanError::config(format!(
                "File extension must not contain separators or whitespace: {:?}",
                self.file_extension
            )));
        }

        if let FailurePolicy::Retry { max_attempts, .. } = self.failure_policy {
            if max_attempts < 1 {
                return Err(CanError::config("Retry policy needs at least 1 attempt"));
            }
        }

        Ok(())
    }

    /// Create a human-readable string representation of the configuration
    pub fn to_string_pretty(&self) -> String {
        let mut result = String::new();

        result.push_str("=== Canner Configuration ===\n\n");
        result.push_str(&format!("  Flush Interval: {} ms\n", self.flush_interval_ms));
        result.push_str(&format!("  Layout: {}\n", self.layout));
        result.push_str(&format!("  File Extension: {}\n", self.file_extension));
        result.push_str(&format!("  Max Open Files: {}\n", self.max_open_files));
        result.push_str(&format!("  Failure Policy: {}\n", self.failure_policy));
        result.push_str(&format!("  Collect Metrics: {}\n", self.collect_metrics));

        result
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = CannerConfig::default();

        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.layout, BucketLayout::Nested);
        assert_eq!(config.file_extension, ".can");
        assert_eq!(config.max_open_files, 1);
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
        assert!(config.collect_metrics);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CannerConfig::new()
            .with_flush_interval(Duration::from_millis(250))
            .with_layout(BucketLayout::Flat)
            .with_file_extension(".log")
            .with_max_open_files(4)
            .with_failure_policy(FailurePolicy::Abort)
            .with_collect_metrics(false);

        assert_eq!(config.flush_interval_ms, 250);
        assert_eq!(config.layout, BucketLayout::Flat);
        assert_eq!(config.file_extension, ".log");
        assert_eq!(config.max_open_files, 4);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert!(!config.collect_metrics);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid_configs = vec![
            CannerConfig::new().with_flush_interval(Duration::ZERO),
            CannerConfig::new().with_max_open_files(0),
            CannerConfig::new().with_file_extension(""),
            CannerConfig::new().with_file_extension("."),
            CannerConfig::new().with_file_extension("can"),
            CannerConfig::new().with_file_extension(".a/b"),
            CannerConfig::new().with_failure_policy(FailurePolicy::Retry {
                max_attempts: 0,
                backoff_ms: 10,
            }),
        ];

        for config in invalid_configs {
            assert!(config.validate().is_err(), "{:?} should be invalid", config);
        }
    }

    #[test]
    fn test_failure_policy() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!("SKIP".parse::<FailurePolicy>().unwrap(), FailurePolicy::Skip);
        assert_eq!(
            "retry".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Retry {
                max_attempts: 3,
                backoff_ms: 100
            }
        );
        assert!("ignore".parse::<FailurePolicy>().is_err());

        assert_eq!(FailurePolicy::Skip.max_attempts(), 1);
        assert_eq!(FailurePolicy::Skip.backoff(1), Duration::ZERO);

        let retry = FailurePolicy::Retry {
            max_attempts: 5,
            backoff_ms: 20,
        };
        assert_eq!(retry.name(), "retry");
        assert_eq!(retry.max_attempts(), 5);
        assert_eq!(retry.backoff(1), Duration::from_millis(20));
        assert_eq!(retry.backoff(3), Duration::from_millis(60));
    }

    #[test]
    fn test_config_pretty_string() {
        let pretty = CannerConfig::new().to_string_pretty();

        assert!(pretty.contains("Flush Interval: 1000 ms"));
        assert!(pretty.contains("Layout: nested"));
        assert!(pretty.contains("Failure Policy: skip"));
    }

    #[test]
    fn test_config_json_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("canner.json");

        let config = CannerConfig::new()
            .with_layout(BucketLayout::Flat)
            .with_failure_policy(FailurePolicy::Retry {
                max_attempts: 2,
                backoff_ms: 5,
            });
        config.to_json_file(&path)?;

        let loaded = CannerConfig::from_json_file(&path)?;
        assert_eq!(loaded, config);

        // Missing fields fall back to defaults
        std::fs::write(&path, r#"{"layout": "flat"}"#)?;
        let partial = CannerConfig::from_json_file(&path)?;
        assert_eq!(partial.layout, BucketLayout::Flat);
        assert_eq!(partial.max_open_files, 1);

        std::fs::write(&path, r#"{"max_open_files": 0}"#)?;
        assert!(matches!(
            CannerConfig::from_json_file(&path),
            Err(CanError::Config(_))
        ));

        Ok(())
    }
}
