//! Bounded-parallel artifact download
//!
//! One [`DownloadTask`] is built per package and handed to a fixed pool of
//! workers through a bounded channel. A worker takes a task, fetches every version
//! of that package in catalog order, then takes the next task. Concurrency is
//! therefore across packages, never across versions of one package.
//!
//! Per artifact:
//! 1. Derive its [`ArtifactLocation`]
//! 2. Skip it if the file is already in the local store
//! 3. Fetch into `<name>.part` (with retry on transient failures)
//! 4. Rename onto the final path on success; remove the partial file on failure
//! 5. Drop "absent upstream" failures silently, append anything else to the
//!    worker's error log
//!
//! Nothing that happens inside one task can stop another task or the pool.


use crate::artifact::{ArtifactLayout, ArtifactLocation};
use crate::catalog::{Catalog, DownloadTask, is_valid_package_id};
use crate::config::{Config, RetryConfig};
use crate::error::{FetchError, ParseError};
use crate::error_log::ErrorLogger;
use crate::fetch::{ArtifactFetcher, FetchOutcome, classify};
use crate::retry::fetch_with_retry;
use crate::types::{DownloadSummary, Event};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-pass counters, updated by all workers
#[derive(Default)]
struct Counters {
    skipped: AtomicU64,
    downloaded: AtomicU64,
    absent: AtomicU64,
    failed: AtomicU64,
}

/// State shared by every worker of one pass
struct WorkerShared {
    fetcher: Arc<dyn ArtifactFetcher>,
    layout: ArtifactLayout,
    error_log: ErrorLogger,
    retry: RetryConfig,
    event_tx: Option<broadcast::Sender<Event>>,
    cancel: CancellationToken,
    counters: Counters,
}

/// Fans a catalog out over a bounded pool of download workers
#[derive(Clone)]
pub struct DownloadCoordinator {
    fetcher: Arc<dyn ArtifactFetcher>,
    layout: ArtifactLayout,
    error_log: ErrorLogger,
    workers: usize,
    progress_interval: u64,
    retry: RetryConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl DownloadCoordinator {
    /// Create a coordinator with `workers` concurrent workers (at least one)
    ///
    /// Retries are disabled and progress is reported every 1000 packages until
    /// overridden with [`with_retry`](Self::with_retry) and
    /// [`with_progress_interval`](Self::with_progress_interval).
    pub fn new(
        fetcher: Arc<dyn ArtifactFetcher>,
        layout: ArtifactLayout,
        error_log: ErrorLogger,
        workers: usize,
    ) -> Self {
        Self {
            fetcher,
            layout,
            error_log,
            workers: workers.max(1),
            progress_interval: 1000,
            retry: RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
            event_tx: None,
        }
    }

    /// Coordinator configured from the `download`, `retry`, `remote` and `paths` sections
    pub fn from_config(config: &Config, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self::new(
            fetcher,
            ArtifactLayout::from_config(config),
            ErrorLogger::new(config.paths.error_log_dir.clone()),
            config.download.workers,
        )
        .with_retry(config.retry.clone())
        .with_progress_interval(config.download.progress_interval)
    }

    /// Retry transient fetch failures per `retry`
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Report progress every `interval` dispatched packages
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Broadcast progress and failures on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Number of workers in the pool
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Mirror every artifact in `catalog`
    ///
    /// Cancelling `cancel` stops dispatch of further packages; fetches already in
    /// flight run to completion and workers stop before their next artifact.
    pub async fn run(&self, catalog: Catalog, cancel: &CancellationToken) -> DownloadSummary {
        let tasks = catalog.into_tasks();
        info!(
            packages = tasks.len(),
            workers = self.workers,
            "Starting downloads"
        );

        let shared = Arc::new(WorkerShared {
            fetcher: Arc::clone(&self.fetcher),
            layout: self.layout.clone(),
            error_log: self.error_log.clone(),
            retry: self.retry.clone(),
            event_tx: self.event_tx.clone(),
            cancel: cancel.clone(),
            counters: Counters::default(),
        });

        let (task_tx, task_rx) = mpsc::channel::<DownloadTask>(self.workers);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let handles: Vec<_> = (0..self.workers)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let task_rx = Arc::clone(&task_rx);
                tokio::spawn(async move { run_worker(worker_id, shared, task_rx).await })
            })
            .collect();

        let mut dispatched = 0u64;
        let mut cancelled = false;
        for task in tasks {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let package_id = task.package_id.clone();

            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                sent = task_tx.send(task) => {
                    if sent.is_err() {
                        error!("All download workers exited early");
                        break;
                    }
                }
            }

            dispatched += 1;
            if dispatched % self.progress_interval == 0 {
                info!(package_id = %package_id, dispatched, "Downloading");
                if let Some(tx) = &self.event_tx {
                    tx.send(Event::Progress {
                        package_id,
                        dispatched,
                    })
                    .ok();
                }
            }
        }
        drop(task_tx);

        for (worker_id, result) in futures::future::join_all(handles)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(e) = result {
                error!(worker_id, error = %e, "Download worker terminated abnormally");
            }
        }

        let counters = &shared.counters;
        let summary = DownloadSummary {
            packages_dispatched: dispatched,
            skipped: counters.skipped.load(Ordering::Relaxed),
            downloaded: counters.downloaded.load(Ordering::Relaxed),
            absent: counters.absent.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled,
        };

        info!(
            packages = summary.packages_dispatched,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            absent = summary.absent,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Done with downloads"
        );
        summary
    }
}

async fn run_worker(
    worker_id: usize,
    shared: Arc<WorkerShared>,
    task_rx: Arc<Mutex<mpsc::Receiver<DownloadTask>>>,
) {
    debug!(worker_id, "Download worker started");
    loop {
        let task = {
            let mut rx = task_rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else { break };
        shared.process_task(worker_id, task).await;
    }
    debug!(worker_id, "Download worker finished");
}

impl WorkerShared {
    async fn process_task(&self, worker_id: usize, task: DownloadTask) {
        // Records built without `parse_line` may carry ids that would escape the store
        if !is_valid_package_id(&task.package_id) {
            self.reject_package(worker_id, &task).await;
            return;
        }

        for record in &task.versions {
            if self.cancel.is_cancelled() {
                debug!(
                    worker_id,
                    package_id = %task.package_id,
                    "Stop requested, abandoning remaining versions"
                );
                return;
            }

            let location = self.layout.locate(&task.package_id, &record.version);
            if tokio::fs::try_exists(&location.local_path)
                .await
                .unwrap_or(false)
            {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            self.fetch_artifact(worker_id, &location).await;
        }
    }

    async fn reject_package(&self, worker_id: usize, task: &DownloadTask) {
        let message = ParseError::InvalidId(task.package_id.clone()).to_string();
        warn!(
            worker_id,
            package_id = %task.package_id,
            versions = task.versions.len(),
            "Refusing to mirror package with an invalid id"
        );
        for record in &task.versions {
            let location = self.layout.locate(&task.package_id, &record.version);
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.error_log
                .log(worker_id, &location.file_name, &location.url, &message)
                .await;
        }
    }

    async fn fetch_artifact(&self, worker_id: usize, location: &ArtifactLocation) {
        let partial = location.partial_path();

        let result = fetch_with_retry(&self.retry, &location.url, || {
            self.fetcher.fetch(&location.url, &partial)
        })
        .await;

        let result = match result {
            Ok(bytes) => tokio::fs::rename(&partial, &location.local_path)
                .await
                .map(|()| bytes)
                .map_err(FetchError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                self.counters.downloaded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id,
                    artifact = %location.file_name,
                    bytes,
                    "Artifact stored"
                );
            }
            Err(e) => {
                remove_partial(&partial).await;
                match classify(&e) {
                    FetchOutcome::Absent => {
                        self.counters.absent.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            worker_id,
                            artifact = %location.file_name,
                            "Artifact absent upstream"
                        );
                    }
                    FetchOutcome::RealFailure => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        let message = error_chain(&e);
                        warn!(
                            worker_id,
                            artifact = %location.file_name,
                            url = %location.url,
                            error = %message,
                            "Artifact download failed"
                        );
                        self.error_log
                            .log(worker_id, &location.file_name, &location.url, &message)
                            .await;
                        if let Some(tx) = &self.event_tx {
                            tx.send(Event::DownloadFailed {
                                worker_id,
                                artifact: location.file_name.clone(),
                                url: location.url.clone(),
                                error: message,
                            })
                            .ok();
                        }
                    }
                }
            }
        }
    }
}

async fn remove_partial(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

/// Render an error with its source chain on one line
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
