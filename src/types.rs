//! Core types and events

/// Outcome of one ingestion pass over the pending directory
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Files fully merged and moved to the archive directory
    pub files_archived: usize,
    /// Files fully merged whose move to the archive failed; they stay pending
    pub files_retained: usize,
    /// Files that contributed nothing (read failure, or a bad line under the reject policy)
    pub files_rejected: usize,
    /// Records folded into the catalog from accepted files
    pub records_merged: usize,
    /// Malformed lines skipped under the skip-line policy
    pub lines_skipped: usize,
}

impl IngestReport {
    /// Total number of log files looked at
    pub fn files_seen(&self) -> usize {
        self.files_archived + self.files_retained + self.files_rejected
    }
}

/// Outcome of one download pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Packages handed to a worker
    pub packages_dispatched: u64,
    /// Artifacts already present in the local store
    pub skipped: u64,
    /// Artifacts fetched and stored
    pub downloaded: u64,
    /// Artifacts the registry reported as absent
    pub absent: u64,
    /// Artifacts that failed and were written to an error log
    pub failed: u64,
    /// True if a stop signal prevented some packages from being dispatched
    pub cancelled: bool,
}

/// Event emitted by the mirror
#[derive(Clone, Debug)]
pub enum Event {
    /// An ingestion pass finished
    Ingested {
        /// What the pass did
        report: IngestReport,
        /// Versions in the catalog after the pass
        catalog_versions: usize,
    },

    /// Periodic dispatch progress
    Progress {
        /// Package just dispatched
        package_id: String,
        /// Packages dispatched so far in this pass
        dispatched: u64,
    },

    /// An artifact fetch failed with a real (non-absent) error
    DownloadFailed {
        /// Worker that handled the artifact
        worker_id: usize,
        /// `<id>.<version>.<ext>`
        artifact: String,
        /// Remote URL
        url: String,
        /// Error message
        error: String,
    },

    /// A download pass finished
    DownloadPassComplete {
        /// What the pass did
        summary: DownloadSummary,
    },

    /// The mirror loop stopped
    Shutdown,
}
