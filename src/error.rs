//! Error types for registry-mirror
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] for configuration, start-up and ingestion failures that reach the caller
//! - [`ParseError`] for a single malformed arrival-log line
//! - [`FetchError`] for a single failed artifact fetch
//!
//! Fetch failures never surface as [`Error`]: the download coordinator classifies
//! them and either drops them (absent upstream) or writes them to a worker error log.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for registry-mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for registry-mirror
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.workers")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pending directory could not be scanned
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Folder watching error
    #[error("folder watch error: {0}")]
    FolderWatch(String),

    /// Shutdown in progress - not starting new cycles
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// A single arrival-log line could not be turned into a version record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Fewer than three whitespace-separated fields
    #[error("expected `<id> <version> <timestamp>`, found {found} field(s)")]
    MissingFields {
        /// Number of fields actually present
        found: usize,
    },

    /// Version string does not follow the NuGet version grammar
    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// Timestamp is not a parseable instant
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        /// The offending timestamp text
        value: String,
        /// Why chrono rejected it
        reason: String,
    },

    /// Package id is not a valid NuGet id (letters, digits, `.`, `_`, `-`)
    #[error("invalid package id '{0}'")]
    InvalidId(String),

    /// Line exceeds the maximum accepted length
    #[error("line longer than {limit} bytes")]
    LineTooLong {
        /// The maximum accepted length in bytes
        limit: usize,
    },
}

/// Per-file ingestion failures
#[derive(Debug, Error)]
pub enum IngestError {
    /// A malformed line caused the whole file to be rejected (reject-file policy)
    #[error("{path}:{line}: {source}")]
    Rejected {
        /// The pending log file
        path: PathBuf,
        /// 1-based line number of the first malformed line
        line: usize,
        /// The underlying parse failure
        source: ParseError,
    },

    /// Reading the file failed part way through
    #[error("failed to read {path}: {source}")]
    Read {
        /// The pending log file
        path: PathBuf,
        /// The underlying I/O failure
        source: std::io::Error,
    },

    /// Moving a consumed file to the archive directory failed
    #[error("failed to archive {source_path} to {dest_path}: {reason}")]
    ArchiveFailed {
        /// The consumed pending file
        source_path: PathBuf,
        /// The intended archive destination
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },
}

/// A single artifact fetch failed
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote source has no such artifact (HTTP 404)
    #[error("artifact not found (HTTP 404)")]
    NotFound,

    /// The remote source answered with an unexpected status
    #[error("unexpected HTTP status {status}")]
    Status {
        /// The HTTP status code
        status: u16,
    },

    /// Transport-level failure (connect, timeout, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Writing the artifact to the local store failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure reported by a fetcher implementation
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_key() {
        let err = Error::config("download.workers", "must be at least 1");
        match &err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("download.workers"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("expected Config, got {other:?}"),
        }
        assert_eq!(err.to_string(), "configuration error: must be at least 1");
    }

    #[test]
    fn rejected_file_message_points_at_line() {
        let err = IngestError::Rejected {
            path: PathBuf::from("/logs/a.txt"),
            line: 3,
            source: ParseError::MissingFields { found: 2 },
        };
        assert_eq!(
            err.to_string(),
            "/logs/a.txt:3: expected `<id> <version> <timestamp>`, found 2 field(s)"
        );
    }

    #[test]
    fn fetch_status_message() {
        assert_eq!(
            FetchError::Status { status: 503 }.to_string(),
            "unexpected HTTP status 503"
        );
        assert_eq!(
            FetchError::NotFound.to_string(),
            "artifact not found (HTTP 404)"
        );
    }
}
