//! Mirror cycle runner
//!
//! [`Mirror`] owns one cycle's catalog and drives it through ingestion and
//! download:
//!
//! - Pending logs are ingested (and archived) until a pass archives nothing.
//! - The accumulated catalog is then handed to the [`DownloadCoordinator`] and
//!   cleared.
//! - The runner sleeps for `watch.poll_interval`, woken early by a new log in the
//!   pending directory or by [`Mirror::shutdown`].
//!
//! Downloading when a pass archives nothing, rather than only when the pending
//! directory is literally empty, keeps a log that can never be archived (a
//! rejected file, an unwritable archive directory, a stray non-log entry) from
//! starving the download side forever.

use crate::catalog::Catalog;
use crate::config::Config;
use crate::coordinator::DownloadCoordinator;
use crate::error::{Error, Result};
use crate::fetch::{ArtifactFetcher, HttpFetcher};
use crate::ingest::LogIngestor;
use crate::types::{DownloadSummary, Event, IngestReport};
use crate::watcher::LogWatcher;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one iteration of the runner did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// New logs were archived; the runner should look again immediately
    Ingested(IngestReport),
    /// Nothing new arrived; the catalog was downloaded and cleared
    Downloaded(DownloadSummary),
}

/// Ingest-then-download cycle runner
pub struct Mirror {
    config: Arc<Config>,
    ingestor: LogIngestor,
    coordinator: DownloadCoordinator,
    /// Catalog accumulated since the last download pass
    catalog: Mutex<Catalog>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Mirror {
    /// Create a mirror fetching over HTTP
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client cannot be built
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.remote)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Create a mirror with a custom fetcher
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn ArtifactFetcher>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(1000);
        let coordinator =
            DownloadCoordinator::from_config(&config, fetcher).with_events(event_tx.clone());

        Ok(Self {
            ingestor: LogIngestor::from_config(&config),
            coordinator,
            catalog: Mutex::new(Catalog::new()),
            event_tx,
            cancel: CancellationToken::new(),
            config: Arc::new(config),
        })
    }

    /// Subscribe to mirror events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token cancelled by [`shutdown`](Self::shutdown)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the runner to stop
    ///
    /// Nothing new is dispatched after this; fetches already in flight complete.
    pub fn shutdown(&self) {
        info!("Shutting down mirror");
        self.cancel.cancel();
    }

    /// Versions currently held in the catalog
    pub async fn catalog_versions(&self) -> usize {
        self.catalog.lock().await.version_count()
    }

    /// Create the store, pending, archive and error-log directories
    ///
    /// # Errors
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown), or an I/O
    /// error if a directory cannot be created
    pub async fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        let paths = &self.config.paths;
        for dir in [
            &paths.store_dir,
            &paths.pending_dir,
            &paths.archive_dir,
            &paths.error_log_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Ingest every pending log into the catalog, archiving consumed files
    ///
    /// # Errors
    /// Returns error if the pending directory cannot be listed
    pub async fn ingest(&self) -> Result<IngestReport> {
        let mut catalog = self.catalog.lock().await;
        let report = self.ingestor.ingest(&mut catalog).await?;
        self.event_tx
            .send(Event::Ingested {
                report: report.clone(),
                catalog_versions: catalog.version_count(),
            })
            .ok();
        Ok(report)
    }

    /// Download everything in the catalog and clear it
    pub async fn download(&self) -> DownloadSummary {
        let catalog = std::mem::take(&mut *self.catalog.lock().await);
        let summary = self.coordinator.run(catalog, &self.cancel).await;
        self.event_tx
            .send(Event::DownloadPassComplete {
                summary: summary.clone(),
            })
            .ok();
        summary
    }

    /// One iteration: ingest, and download if the pass archived nothing
    ///
    /// # Errors
    /// Returns error if the pending directory cannot be listed
    pub async fn step(&self) -> Result<Step> {
        let report = self.ingest().await?;
        if report.files_archived > 0 {
            return Ok(Step::Ingested(report));
        }
        Ok(Step::Downloaded(self.download().await))
    }

    /// One full ingest and download pass, then return
    ///
    /// # Errors
    /// Returns error if the directories cannot be created or the pending
    /// directory cannot be listed
    pub async fn run_once(&self) -> Result<(IngestReport, DownloadSummary)> {
        self.start().await?;
        let report = self.ingest().await?;
        let summary = self.download().await;
        Ok((report, summary))
    }

    /// Run the polling loop until [`shutdown`](Self::shutdown)
    ///
    /// # Errors
    /// Returns error if the directories cannot be created
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let mut watcher = if self.config.watch.notify {
            match self.start_watcher() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "Filesystem notifications unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };

        info!(
            pending = %self.config.paths.pending_dir.display(),
            store = %self.config.paths.store_dir.display(),
            workers = self.coordinator.workers(),
            "Mirror started"
        );

        while !self.cancel.is_cancelled() {
            match self.step().await {
                Ok(Step::Ingested(_)) => continue,
                Ok(Step::Downloaded(_)) => {}
                Err(e) => error!(error = %e, "Mirror cycle failed"),
            }
            self.wait(&mut watcher).await;
        }

        info!("Mirror stopped");
        self.event_tx.send(Event::Shutdown).ok();
        Ok(())
    }

    fn start_watcher(&self) -> Result<LogWatcher> {
        let mut watcher = LogWatcher::new(&self.config.paths.pending_dir)?;
        watcher.start()?;
        Ok(watcher)
    }

    /// Sleep for the poll interval, or less if woken
    async fn wait(&self, watcher: &mut Option<LogWatcher>) {
        let sleep = tokio::time::sleep(self.config.watch.poll_interval);
        let mut watcher_closed = false;

        match watcher.as_mut() {
            Some(w) => {
                w.drain();
                tokio::select! {
                    _ = sleep => {}
                    _ = self.cancel.cancelled() => {}
                    woke = w.changed() => {
                        watcher_closed = !woke;
                        debug!("Woken by pending directory change");
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = sleep => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        if watcher_closed {
            warn!("Filesystem watcher closed, polling only");
            *watcher = None;
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves every URL with its own text, except URLs containing "missing"
    #[derive(Default)]
    struct EchoFetcher {
        calls: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactFetcher for EchoFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> std::result::Result<u64, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("missing") {
                return Err(FetchError::NotFound);
            }
            tokio::fs::write(dest, url.as_bytes()).await?;
            Ok(url.len() as u64)
        }
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.remote.url_prefix = "https://mirror.test/v3/".to_string();
        config.paths.store_dir = root.join("store");
        config.paths.pending_dir = root.join("pending");
        config.paths.archive_dir = root.join("archive");
        config.paths.error_log_dir = root.join("errors");
        config.download.workers = 2;
        config.watch.poll_interval = Duration::from_millis(20);
        config.retry.max_attempts = 0;
        config
    }

    fn mirror(root: &Path) -> (Mirror, Arc<EchoFetcher>) {
        let fetcher = Arc::new(EchoFetcher::default());
        let mirror = Mirror::with_fetcher(test_config(root), fetcher.clone()).unwrap();
        (mirror, fetcher)
    }

    #[tokio::test]
    async fn start_creates_all_directories() {
        let dir = TempDir::new().unwrap();
        let (mirror, _) = mirror(dir.path());

        mirror.start().await.unwrap();

        for sub in ["store", "pending", "archive", "errors"] {
            assert!(dir.path().join(sub).is_dir(), "{sub} missing");
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.download.workers = 0;

        let result = Mirror::with_fetcher(config, Arc::new(EchoFetcher::default()));
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn step_ingests_first_then_downloads_and_clears() {
        let dir = TempDir::new().unwrap();
        let (mirror, fetcher) = mirror(dir.path());
        mirror.start().await.unwrap();

        std::fs::write(
            dir.path().join("pending/a.txt"),
            "Foo 1.0.0 2024-01-01T00:00:00Z\nFoo 2.0.0 2024-01-02T00:00:00Z\n",
        )
        .unwrap();

        match mirror.step().await.unwrap() {
            Step::Ingested(report) => assert_eq!(report.files_archived, 1),
            other => panic!("expected ingestion, got {other:?}"),
        }
        assert_eq!(mirror.catalog_versions().await, 2);
        assert!(fetcher.calls.lock().unwrap().is_empty());

        match mirror.step().await.unwrap() {
            Step::Downloaded(summary) => assert_eq!(summary.downloaded, 2),
            other => panic!("expected download, got {other:?}"),
        }
        assert_eq!(mirror.catalog_versions().await, 0);
        assert!(dir.path().join("store/Foo.1.0.0.nupkg").exists());
        assert!(dir.path().join("store/Foo.2.0.0.nupkg").exists());
        assert!(dir.path().join("archive/a.txt").exists());
    }

    #[tokio::test]
    async fn stuck_log_does_not_starve_downloads() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.ingest.parse_policy = crate::config::ParsePolicy::RejectFile;
        let fetcher = Arc::new(EchoFetcher::default());
        let mirror = Mirror::with_fetcher(config, fetcher.clone()).unwrap();
        mirror.start().await.unwrap();

        std::fs::write(dir.path().join("pending/bad.txt"), "not a record\n").unwrap();

        assert!(matches!(
            mirror.step().await.unwrap(),
            Step::Downloaded(_)
        ));
        assert!(dir.path().join("pending/bad.txt").exists());
    }

    #[tokio::test]
    async fn run_once_ingests_and_downloads() {
        let dir = TempDir::new().unwrap();
        let (mirror, fetcher) = mirror(dir.path());
        std::fs::create_dir_all(dir.path().join("pending")).unwrap();
        std::fs::write(
            dir.path().join("pending/a.txt"),
            "Bar 1.0.0 2024-01-01T00:00:00Z\nmissing 1.0.0 2024-01-01T00:00:00Z\n",
        )
        .unwrap();

        let (report, summary) = mirror.run_once().await.unwrap();

        assert_eq!(report.files_archived, 1);
        assert_eq!(report.records_merged, 2);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.absent, 1);
        assert_eq!(fetcher.calls.lock().unwrap().len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("store/Bar.1.0.0.nupkg")).unwrap(),
            "https://mirror.test/v3/Bar/1.0.0/Bar.1.0.0.nupkg"
        );
    }

    #[tokio::test]
    async fn run_once_after_shutdown_is_refused() {
        let dir = TempDir::new().unwrap();
        let (mirror, _) = mirror(dir.path());
        mirror.shutdown();

        assert!(matches!(mirror.run_once().await, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn run_picks_up_new_logs_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (mirror, _) = mirror(dir.path());
        let mirror = Arc::new(mirror);
        let mut events = mirror.subscribe();

        let handle = tokio::spawn({
            let mirror = Arc::clone(&mirror);
            async move { mirror.run().await }
        });

        // Wait for the first (empty) download pass so the directories exist
        loop {
            if let Event::DownloadPassComplete { .. } = events.recv().await.unwrap() {
                break;
            }
        }

        std::fs::write(
            dir.path().join("pending/late.txt"),
            "Late 1.0.0 2024-01-01T00:00:00Z\n",
        )
        .unwrap();

        let stored = dir.path().join("store/Late.1.0.0.nupkg");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !stored.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("log was not mirrored");

        mirror.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop")
            .unwrap()
            .unwrap();

        let mut saw_shutdown = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::Shutdown) {
                saw_shutdown = true;
            }
        }
        assert!(saw_shutdown);
    }
}
