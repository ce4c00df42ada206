//! # registry-mirror
//!
//! Mirrors package registry artifacts (NuGet `.nupkg` files by default) to local
//! storage, driven by catalog arrival logs.
//!
//! ## How it works
//!
//! - Arrival logs (`*.txt`, one `<id> <version> <timestamp>` record per line) are
//!   dropped into a pending directory.
//! - Each cycle merges every pending log into one [`Catalog`], keeping the record
//!   with the latest commit timestamp per package version, and archives the
//!   consumed logs.
//! - The catalog is then fanned out over a bounded pool of download workers.
//!   Artifacts already in the store are skipped, "not found" upstream is a normal
//!   outcome, and any other failure goes to a per-worker error log.
//!
//! ## Quick Start
//!
//! ```no_run
//! use registry_mirror::{Config, Mirror, run_with_shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mirror = Arc::new(Mirror::new(Config::default())?);
//!
//!     // Subscribe to events
//!     let mut events = mirror.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     run_with_shutdown(mirror).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Artifact naming and local layout
pub mod artifact;
/// Version records and the per-cycle catalog
pub mod catalog;
/// Configuration types
pub mod config;
/// Bounded-parallel artifact download
pub mod coordinator;
/// Error types
pub mod error;
/// Per-worker failure logs
pub mod error_log;
/// Artifact fetching and failure classification
pub mod fetch;
/// Arrival log ingestion
pub mod ingest;
/// Ingest-then-download cycle runner
pub mod mirror;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Pending directory watching
pub mod watcher;

// Re-export commonly used types
pub use artifact::{ArtifactLayout, ArtifactLocation};
pub use catalog::{Catalog, DownloadTask, MergeOutcome, NuGetVersion, VersionRecord};
pub use config::{Config, ParsePolicy};
pub use coordinator::DownloadCoordinator;
pub use error::{Error, FetchError, IngestError, ParseError, Result};
pub use error_log::ErrorLogger;
pub use fetch::{ArtifactFetcher, FetchOutcome, HttpFetcher, classify};
pub use ingest::LogIngestor;
pub use mirror::{Mirror, Step};
pub use types::{DownloadSummary, Event, IngestReport};

use std::sync::Arc;

/// Run the mirror loop until a termination signal arrives.
///
/// On SIGTERM or SIGINT the mirror's token is cancelled: no further packages are
/// dispatched, fetches in flight finish, and this returns once the loop exits.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(mirror: Arc<Mirror>) -> Result<()> {
    let mut runner = tokio::spawn({
        let mirror = Arc::clone(&mirror);
        async move { mirror.run().await }
    });

    let joined = tokio::select! {
        _ = wait_for_signal() => {
            mirror.shutdown();
            runner.await
        }
        joined = &mut runner => joined,
    };

    joined.map_err(|e| Error::Other(format!("mirror task failed: {}", e)))?
}

/// Resolve when SIGTERM or SIGINT arrives
///
/// Either handler may fail to register in restricted environments; the other one
/// is still honoured, and with neither the mirror falls back to `ctrl_c`.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    fn register(kind: SignalKind, name: &'static str) -> Option<Signal> {
        signal(kind)
            .map_err(|e| tracing::warn!(signal = name, error = %e, "Signal handler unavailable"))
            .ok()
    }

    async fn next(handler: &mut Option<Signal>) -> Option<()> {
        match handler {
            Some(handler) => handler.recv().await,
            None => std::future::pending().await,
        }
    }

    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("No signal handlers registered, stopping the mirror on Ctrl+C only");
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        return;
    }

    let received = tokio::select! {
        Some(()) = next(&mut sigterm) => "SIGTERM",
        Some(()) = next(&mut sigint) => "SIGINT",
        else => "signal stream closed",
    };
    tracing::info!(signal = received, "Stopping mirror");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "Ctrl+C", "Stopping mirror"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
