//! Artifact fetching and failure classification
//!
//! The coordinator only needs "put the bytes behind this URL at this path" and a
//! way to tell "the registry has no such artifact" apart from everything else.
//! [`ArtifactFetcher`] is that seam; [`HttpFetcher`] is the production implementation.

mod http;

pub use http::HttpFetcher;

use crate::error::FetchError;
use std::path::Path;

/// Abstraction over artifact download, enabling testability.
///
/// Implementations write the response body to `dest` and return the number of
/// bytes written. On failure they may leave a partial file at `dest`; the caller
/// only ever passes a scratch path and removes it on error.
#[async_trait::async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Download `url` into `dest`
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// How a failed fetch is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The registry has no such artifact (unlisted or deleted upstream). Not an error.
    Absent,
    /// Anything else; written to the worker's error log
    RealFailure,
}

/// Decide whether a fetch failure is the benign "not found" case
pub fn classify(err: &FetchError) -> FetchOutcome {
    match err {
        FetchError::NotFound => FetchOutcome::Absent,
        FetchError::Network(e) if e.status() == Some(reqwest::StatusCode::NOT_FOUND) => {
            FetchOutcome::Absent
        }
        FetchError::Status { .. }
        | FetchError::Network(_)
        | FetchError::Io(_)
        | FetchError::Other(_) => FetchOutcome::RealFailure,
    }
}
