//! Error handling for the canner
//!
//! This module provides the error type and result alias shared by the record
//! codec and the canner.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while encoding, decoding, or canning records
#[derive(Error, Debug)]
pub enum CanError {
    /// A stored line could not be decoded into a record
    #[error("Format error: {0}")]
    Format(String),

    /// A record could not be encoded into a line
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Errors related to I/O operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors tied to a specific bucket file or directory
    #[error("Bucket file error for {path:?}: {message}")]
    Bucket {
        path: PathBuf,
        message: String,
    },

    /// Errors related to serialization/deserialization of configuration
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors related to configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The canner no longer accepts records
    #[error("Canner is closed")]
    Closed,

    /// The background worker went away without answering
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type for canner operations
pub type Result<T> = std::result::Result<T, CanError>;

impl CanError {
    /// Create a new format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// Create a new encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Create a new bucket file error
    pub fn bucket(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Bucket {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    /// Check if this is a decode failure
    pub fn is_format_error(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// Check if this is an encode failure
    pub fn is_encoding_error(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }

    /// Check if this is a closed error
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Codec failures are a property of the record itself, so only
    /// filesystem errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Bucket { .. })
    }
}
