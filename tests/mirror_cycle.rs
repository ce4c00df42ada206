//! End-to-end mirror cycles against a local HTTP registry
//!
//! Each test stands up a `wiremock` server as the flat-container endpoint, drops
//! arrival logs into a scratch pending directory and drives [`Mirror`] through
//! real ingestion, archiving and HTTP downloads.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{MIXED_LOG, MirrorDirs, STALE_LOG, artifact_path};
use registry_mirror::{Event, Mirror};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn registry() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(artifact_path("Newtonsoft.Json", "13.0.1")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"newtonsoft-bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    // Already in the store; must never be requested
    Mock::given(method("GET"))
        .and(path(artifact_path("Foo", "1.0.0")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(artifact_path("Foo", "2.0.0")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(artifact_path("Bar", "1.0.0")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn one_cycle_mirrors_new_artifacts_and_logs_only_real_failures() {
    let server = registry().await;
    let dirs = MirrorDirs::new();
    std::fs::create_dir_all(dirs.store()).unwrap();
    std::fs::write(dirs.store().join("Foo.1.0.0.nupkg"), b"already here").unwrap();
    dirs.drop_log("a.txt", MIXED_LOG);
    dirs.drop_log("b.txt", STALE_LOG);

    let mirror = Mirror::new(dirs.config(&format!("{}/v3/", server.uri()))).unwrap();
    let (report, summary) = mirror.run_once().await.unwrap();

    assert_eq!(report.files_archived, 2);
    assert_eq!(report.records_merged, 5);
    assert_eq!(summary.packages_dispatched, 3);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.absent, 1);
    assert_eq!(summary.failed, 1);

    assert_eq!(
        dirs.list(&dirs.store()),
        vec!["Foo.1.0.0.nupkg", "Newtonsoft.Json.13.0.1.nupkg"]
    );
    assert_eq!(
        std::fs::read(dirs.store().join("Newtonsoft.Json.13.0.1.nupkg")).unwrap(),
        b"newtonsoft-bytes"
    );
    assert_eq!(
        std::fs::read(dirs.store().join("Foo.1.0.0.nupkg")).unwrap(),
        b"already here"
    );

    let errors = dirs.error_lines();
    assert_eq!(errors.len(), 1, "errors: {errors:?}");
    assert!(errors[0].starts_with("Bar.1.0.0.nupkg "));
    assert!(errors[0].contains(&artifact_path("Bar", "1.0.0")));
    assert!(!errors.iter().any(|l| l.contains("Foo.2.0.0")));

    assert_eq!(dirs.list(&dirs.archive()), vec!["a.txt", "b.txt"]);
    assert!(dirs.list(&dirs.pending()).is_empty());
}

#[tokio::test]
async fn replaying_the_same_logs_fetches_nothing_new() {
    let server = registry().await;
    let dirs = MirrorDirs::new();
    std::fs::create_dir_all(dirs.store()).unwrap();
    std::fs::write(dirs.store().join("Foo.1.0.0.nupkg"), b"already here").unwrap();

    let mirror = Mirror::new(dirs.config(&format!("{}/v3/", server.uri()))).unwrap();

    dirs.drop_log("a.txt", MIXED_LOG);
    mirror.run_once().await.unwrap();

    dirs.drop_log("a-again.txt", MIXED_LOG);
    let (_, summary) = mirror.run_once().await.unwrap();

    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.skipped, 2);
    // Newtonsoft.Json is requested exactly once across both cycles (checked on drop)
}

#[tokio::test]
async fn polling_loop_mirrors_late_logs_until_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(artifact_path("Late", "1.0.0")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"late".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dirs = MirrorDirs::new();
    let mirror = Arc::new(Mirror::new(dirs.config(&format!("{}/v3/", server.uri()))).unwrap());
    let mut events = mirror.subscribe();

    let runner = tokio::spawn({
        let mirror = Arc::clone(&mirror);
        async move { mirror.run().await }
    });

    dirs.drop_log("late.txt", "Late 1.0.0 2024-06-01T12:00:00+02:00\n");

    let stored = dirs.store().join("Late.1.0.0.nupkg");
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(Event::DownloadPassComplete { summary }) = events.recv().await {
                if summary.downloaded == 1 {
                    break;
                }
            }
        }
    })
    .await
    .expect("late log was never mirrored");

    assert_eq!(std::fs::read(&stored).unwrap(), b"late");
    assert_eq!(dirs.list(&dirs.archive()), vec!["late.txt"]);

    mirror.shutdown();
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .expect("mirror did not stop")
        .unwrap()
        .unwrap();
}
