//! Worker-partitioned error logs
//!
//! Each download worker appends to its own `error_<worker>.txt`, so workers never
//! contend on a shared file. Lines are `<artifact name> <url> <message>`.
//! Writing is best-effort: a failure is reported through `tracing` and otherwise
//! ignored, so a broken error log can never take a worker down.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Appends fetch failures to per-worker files in one directory
#[derive(Debug, Clone)]
pub struct ErrorLogger {
    dir: PathBuf,
}

impl ErrorLogger {
    /// Create a logger writing into `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the worker files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File used by `worker_id`
    pub fn path_for(&self, worker_id: usize) -> PathBuf {
        self.dir.join(format!("error_{}.txt", worker_id))
    }

    /// Append one failure line for `worker_id`. Never fails.
    pub async fn log(&self, worker_id: usize, artifact_name: &str, url: &str, message: &str) {
        let path = self.path_for(worker_id);
        let line = format!("{} {} {}\n", artifact_name, url, single_line(message));

        if let Err(e) = self.append(&path, &line).await {
            tracing::warn!(
                worker_id,
                path = %path.display(),
                error = %e,
                "Failed to write error log entry"
            );
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Collapse line breaks so one failure is always one line
fn single_line(message: &str) -> String {
    message
        .split(['\r', '\n'])
        .filter(|part| !part.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_directory_and_file_on_first_write() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ErrorLogger::new(temp_dir.path().join("errors"));

        logger
            .log(3, "Bar.1.0.0.nupkg", "http://host/Bar/1.0.0/Bar.1.0.0.nupkg", "timed out")
            .await;

        let content = std::fs::read_to_string(logger.path_for(3)).unwrap();
        assert_eq!(
            content,
            "Bar.1.0.0.nupkg http://host/Bar/1.0.0/Bar.1.0.0.nupkg timed out\n"
        );
        assert!(logger.path_for(3).ends_with("error_3.txt"));
    }

    #[tokio::test]
    async fn appends_and_partitions_by_worker() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ErrorLogger::new(temp_dir.path());

        logger.log(0, "A.1.0.0.nupkg", "u1", "first").await;
        logger.log(0, "A.2.0.0.nupkg", "u2", "second").await;
        logger.log(1, "B.1.0.0.nupkg", "u3", "third").await;

        let worker0 = std::fs::read_to_string(logger.path_for(0)).unwrap();
        let worker1 = std::fs::read_to_string(logger.path_for(1)).unwrap();
        assert_eq!(worker0.lines().count(), 2);
        assert_eq!(worker1.lines().count(), 1);
        assert!(worker1.starts_with("B.1.0.0.nupkg u3 third"));
    }

    #[tokio::test]
    async fn multiline_messages_become_one_line() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ErrorLogger::new(temp_dir.path());

        logger
            .log(0, "A.1.0.0.nupkg", "u", "error sending request\r\n  caused by: reset\n")
            .await;

        let content = std::fs::read_to_string(logger.path_for(0)).unwrap();
        assert_eq!(content, "A.1.0.0.nupkg u error sending request caused by: reset\n");
    }

    #[tokio::test]
    async fn unwritable_location_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the directory should be
        let blocker = temp_dir.path().join("errors");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let logger = ErrorLogger::new(&blocker);

        // Must return normally
        logger.log(0, "A.1.0.0.nupkg", "u", "boom").await;

        assert!(blocker.is_file());
    }
}
