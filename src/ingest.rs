//! Arrival-log ingestion
//!
//! Reads every `*.txt` file in the pending directory, folds each line into the
//! cycle's [`Catalog`], and moves fully consumed files to the archive directory.
//!
//! A file's records are staged in their own catalog and only folded into the
//! cycle catalog once the whole file has been read (and, under
//! [`ParsePolicy::RejectFile`], every line parsed). A file therefore contributes
//! either all of its records or none of them. Once folded in, the records stay
//! even if the archive move fails; the file is simply read again next pass, which
//! is harmless because merging is idempotent.

use crate::catalog::{Catalog, parse_line};
use crate::config::{Config, ParsePolicy};
use crate::error::{Error, IngestError, ParseError, Result};
use crate::types::IngestReport;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{debug, info, warn};

/// Extension (case-insensitive) of arrival-log files
const LOG_EXTENSION: &str = "txt";

/// Longest accepted arrival-log line, in bytes, excluding the trailing `\n`
pub const MAX_LINE_BYTES: usize = 4096;

/// What happened to one file
#[derive(Debug)]
enum FileOutcome {
    Accepted { records: usize, skipped: usize },
    Rejected(IngestError),
}

/// Reads pending arrival logs into a catalog and archives them
#[derive(Debug, Clone)]
pub struct LogIngestor {
    pending_dir: PathBuf,
    archive_dir: PathBuf,
    policy: ParsePolicy,
}

impl LogIngestor {
    /// Create an ingestor
    pub fn new(
        pending_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        policy: ParsePolicy,
    ) -> Self {
        Self {
            pending_dir: pending_dir.into(),
            archive_dir: archive_dir.into(),
            policy,
        }
    }

    /// Ingestor described by the `paths` and `ingest` sections of a config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.paths.pending_dir.clone(),
            config.paths.archive_dir.clone(),
            config.ingest.parse_policy,
        )
    }

    /// Directory scanned for arrival logs
    pub fn pending_dir(&self) -> &Path {
        &self.pending_dir
    }

    /// Check if a path looks like an arrival log
    pub fn is_log_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(LOG_EXTENSION))
            .unwrap_or(false)
    }

    /// Regular `*.txt` files in the pending directory, sorted by name
    ///
    /// A missing pending directory is treated as empty.
    pub async fn pending_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.pending_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.scan_error(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.scan_error(e))? {
            let path = entry.path();
            if !Self::is_log_file(&path) {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => files.push(path),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot stat pending entry"),
            }
        }
        files.sort();
        Ok(files)
    }

    fn scan_error(&self, source: std::io::Error) -> Error {
        Error::Ingest(IngestError::Read {
            path: self.pending_dir.clone(),
            source,
        })
    }

    /// Merge every pending file into `catalog` and archive the ones fully consumed
    pub async fn ingest(&self, catalog: &mut Catalog) -> Result<IngestReport> {
        self.run(catalog, true).await
    }

    /// Merge every pending file into `catalog`, leaving all files in place
    pub async fn ingest_without_archiving(&self, catalog: &mut Catalog) -> Result<IngestReport> {
        self.run(catalog, false).await
    }

    async fn run(&self, catalog: &mut Catalog, archive: bool) -> Result<IngestReport> {
        let files = self.pending_files().await?;
        let mut report = IngestReport::default();

        for path in files {
            match self.read_file(&path, catalog).await {
                FileOutcome::Accepted { records, skipped } => {
                    report.records_merged += records;
                    report.lines_skipped += skipped;
                    debug!(path = %path.display(), records, skipped, "Merged arrival log");

                    if !archive {
                        report.files_retained += 1;
                    } else if let Err(e) = self.archive(&path).await {
                        warn!(error = %e, "Arrival log stays pending");
                        report.files_retained += 1;
                    } else {
                        report.files_archived += 1;
                    }
                }
                FileOutcome::Rejected(e) => {
                    warn!(error = %e, "Arrival log rejected; it stays pending");
                    report.files_rejected += 1;
                }
            }
        }

        if report.files_seen() > 0 {
            info!(
                files_archived = report.files_archived,
                files_retained = report.files_retained,
                files_rejected = report.files_rejected,
                records = report.records_merged,
                skipped_lines = report.lines_skipped,
                catalog_versions = catalog.version_count(),
                "Ingestion pass complete"
            );
        }
        Ok(report)
    }

    /// Read one file into a staging catalog and fold it into `catalog` on success
    async fn read_file(&self, path: &Path, catalog: &mut Catalog) -> FileOutcome {
        let read_error = |source| {
            FileOutcome::Rejected(IngestError::Read {
                path: path.to_path_buf(),
                source,
            })
        };

        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) => return read_error(e),
        };
        let mut reader = tokio::io::BufReader::new(file);

        let mut staged = Catalog::new();
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        let mut records = 0usize;
        let mut skipped = 0usize;

        loop {
            buf.clear();
            let truncated = match read_line_capped(&mut reader, &mut buf).await {
                Ok((0, _)) => break,
                Ok((_, truncated)) => truncated,
                Err(e) => return read_error(e),
            };
            line_no += 1;

            let text = String::from_utf8_lossy(&buf);
            let text = if line_no == 1 {
                text.trim_start_matches('\u{feff}')
            } else {
                &text
            };
            if text.trim().is_empty() {
                continue;
            }

            let parsed = if truncated {
                Err(ParseError::LineTooLong {
                    limit: MAX_LINE_BYTES,
                })
            } else {
                parse_line(text)
            };

            match parsed {
                Ok(record) => {
                    staged.merge(record);
                    records += 1;
                }
                Err(source) => match self.policy {
                    ParsePolicy::SkipLine => {
                        warn!(
                            path = %path.display(),
                            line = line_no,
                            error = %source,
                            "Skipping malformed arrival-log line"
                        );
                        skipped += 1;
                    }
                    ParsePolicy::RejectFile => {
                        return FileOutcome::Rejected(IngestError::Rejected {
                            path: path.to_path_buf(),
                            line: line_no,
                            source,
                        });
                    }
                },
            }
        }

        catalog.absorb(staged);
        FileOutcome::Accepted { records, skipped }
    }

    /// Move a consumed file into the archive directory, keeping its name
    async fn archive(&self, path: &Path) -> std::result::Result<PathBuf, IngestError> {
        let failed = |dest: &Path, reason: String| IngestError::ArchiveFailed {
            source_path: path.to_path_buf(),
            dest_path: dest.to_path_buf(),
            reason,
        };

        let file_name = path
            .file_name()
            .ok_or_else(|| failed(&self.archive_dir, "file has no name".to_string()))?;
        let dest = self.archive_dir.join(file_name);

        tokio::fs::create_dir_all(&self.archive_dir)
            .await
            .map_err(|e| failed(&dest, format!("cannot create archive directory: {}", e)))?;

        match tokio::fs::rename(path, &dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                tokio::fs::copy(path, &dest)
                    .await
                    .map_err(|e| failed(&dest, e.to_string()))?;
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| failed(&dest, e.to_string()))?;
            }
            Err(e) => return Err(failed(&dest, e.to_string())),
        }

        debug!(from = %path.display(), to = %dest.display(), "Archived arrival log");
        Ok(dest)
    }
}

/// Read one line into `buf`, keeping at most [`MAX_LINE_BYTES`] of it
///
/// Returns the number of bytes consumed (0 at end of input) and whether the line
/// was longer than the cap. The remainder of an overlong line is skipped without
/// being buffered.
async fn read_line_capped<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<(usize, bool)>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_LINE_BYTES as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if buf.len() <= MAX_LINE_BYTES || buf.ends_with(b"\n") {
        return Ok((read, false));
    }

    let mut consumed = read;
    loop {
        let (advance, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(advance);
        consumed += advance;
        if done {
            break;
        }
    }
    Ok((consumed, true))
}
