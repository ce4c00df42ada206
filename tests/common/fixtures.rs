//! Scratch directories, configurations and arrival-log content

use registry_mirror::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Arrival log with a superseded record, an absent artifact and a failing one
pub const MIXED_LOG: &str = "\
Newtonsoft.Json 13.0.1 2021-03-22T20:10:49Z
Foo 1.0.0 2024-01-01T00:00:00Z
Foo 2.0.0 2024-01-02T00:00:00Z
Bar 1.0.0 2024-01-03T00:00:00Z
";

/// Second log restating Newtonsoft.Json with an older timestamp
pub const STALE_LOG: &str = "\
Newtonsoft.Json 13.0.1 2020-01-01T00:00:00Z
";

/// Directory tree for one mirror
pub struct MirrorDirs {
    /// Owns the scratch tree
    pub root: TempDir,
}

impl MirrorDirs {
    /// Fresh scratch tree
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    /// `<root>/<name>`
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    /// Local artifact store
    pub fn store(&self) -> PathBuf {
        self.path("store")
    }

    /// Pending arrival logs
    pub fn pending(&self) -> PathBuf {
        self.path("pending")
    }

    /// Archived arrival logs
    pub fn archive(&self) -> PathBuf {
        self.path("archive")
    }

    /// Worker error logs
    pub fn errors(&self) -> PathBuf {
        self.path("errors")
    }

    /// Write an arrival log into the pending directory
    pub fn drop_log(&self, name: &str, content: &str) {
        std::fs::create_dir_all(self.pending()).unwrap();
        std::fs::write(self.pending().join(name), content).unwrap();
    }

    /// Configuration pointing at this tree and at `url_prefix`
    pub fn config(&self, url_prefix: &str) -> Config {
        let mut config = Config::default();
        config.remote.url_prefix = url_prefix.to_string();
        config.remote.request_timeout = Duration::from_secs(10);
        config.paths.store_dir = self.store();
        config.paths.pending_dir = self.pending();
        config.paths.archive_dir = self.archive();
        config.paths.error_log_dir = self.errors();
        config.download.workers = 3;
        config.watch.poll_interval = Duration::from_millis(25);
        config.watch.notify = false;
        config.retry.max_attempts = 0;
        config
    }

    /// Sorted file names in `dir`
    pub fn list(&self, dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Concatenated contents of every worker error log
    pub fn error_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for name in self.list(&self.errors()) {
            let text = std::fs::read_to_string(self.errors().join(name)).unwrap();
            lines.extend(text.lines().map(str::to_string));
        }
        lines
    }
}

/// Flat-container path of one artifact
pub fn artifact_path(id: &str, version: &str) -> String {
    format!("/v3/{id}/{version}/{id}.{version}.nupkg")
}
