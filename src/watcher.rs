//! Pending directory watching
//!
//! The mirror loop polls the pending directory on a fixed interval. A
//! [`LogWatcher`] shortens the wait: it turns filesystem notifications for new or
//! modified `*.txt` files into wake-ups, so a freshly dropped log is picked up
//! without waiting out the poll interval. Polling stays the source of truth;
//! missed or coalesced notifications only cost latency.

use crate::error::{Error, Result};
use crate::ingest::LogIngestor;
use notify::event::{ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Watches the pending directory for new catalog logs
pub struct LogWatcher {
    /// Filesystem watcher instance
    watcher: RecommendedWatcher,

    /// Channel for receiving filesystem events
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,

    /// Watched directory
    dir: PathBuf,
}

impl LogWatcher {
    /// Create a watcher for `dir`. Nothing is watched until [`start`](Self::start).
    ///
    /// # Errors
    /// Returns error if the filesystem watcher cannot be initialized
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = tx.send(res) {
                    error!("Failed to send filesystem event: {}", e);
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::FolderWatch(e.to_string()))?;

        Ok(Self {
            watcher,
            rx,
            dir: dir.into(),
        })
    }

    /// The watched directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start watching, creating the directory if needed
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or watched
    pub fn start(&mut self) -> Result<()> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                Error::FolderWatch(format!("Failed to create pending directory: {}", e))
            })?;
            info!(path = %self.dir.display(), "Created pending directory");
        }

        self.watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::FolderWatch(format!("Failed to watch folder: {}", e)))?;

        info!(path = %self.dir.display(), "Watching pending directory");
        Ok(())
    }

    /// Discard every queued notification, returning how many there were
    ///
    /// Events pile up while the mirror is busy (including those caused by its
    /// own archive moves). Draining them before waiting keeps stale events from
    /// cutting the next wait short; the following ingestion pass sees those files
    /// anyway.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Discarded queued filesystem events");
        }
        drained
    }

    /// Wait until a log file is created or modified
    ///
    /// Events for other files and other event kinds are drained and ignored.
    /// Returns `false` once the watcher can deliver no more events.
    pub async fn changed(&mut self) -> bool {
        while let Some(result) = self.rx.recv().await {
            match result {
                Ok(event) if is_log_event(&event) => {
                    debug!(paths = ?event.paths, "Pending log changed");
                    return true;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Filesystem watcher error"),
            }
        }
        false
    }
}

/// True for creation or modification of at least one `*.txt` file
///
/// A rename away from the directory (our own archive move) is not a change.
fn is_log_event(event: &Event) -> bool {
    let relevant = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    relevant && event.paths.iter().any(|p| LogIngestor::is_log_file(p))
}
