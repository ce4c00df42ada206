//! reqwest-backed [`ArtifactFetcher`]

use super::ArtifactFetcher;
use crate::config::RemoteConfig;
use crate::error::{Error, FetchError};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Fetches artifacts over HTTP(S), streaming the body to disk
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with the timeouts and user agent from `config`
    pub fn new(config: &RemoteConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let mut response = self.client.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        tracing::trace!(url, bytes = written, "artifact body written");
        Ok(written)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchOutcome, classify};
    use crate::retry::IsRetryable;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        let config = RemoteConfig {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        HttpFetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn writes_body_on_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Foo/1.0.0/Foo.1.0.0.nupkg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK\x03\x04payload".to_vec()))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("Foo.1.0.0.nupkg.part");
        let url = format!("{}/Foo/1.0.0/Foo.1.0.0.nupkg", mock_server.uri());

        let written = fetcher().fetch(&url, &dest).await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PK\x03\x04payload");
    }

    #[tokio::test]
    async fn http_404_is_not_found_and_writes_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("missing.part");
        let url = format!("{}/Gone/1.0.0/Gone.1.0.0.nupkg", mock_server.uri());

        let err = fetcher().fetch(&url, &dest).await.unwrap_err();

        assert!(matches!(err, FetchError::NotFound));
        assert_eq!(classify(&err), FetchOutcome::Absent);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn server_error_is_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("busy.part");
        let url = format!("{}/Busy/1.0.0/Busy.1.0.0.nupkg", mock_server.uri());

        let err = fetcher().fetch(&url, &dest).await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 503 }));
        assert_eq!(classify(&err), FetchOutcome::RealFailure);
    }

    #[tokio::test]
    async fn connection_refused_is_network_failure() {
        // Reserve a free port, then release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{}/Foo/1.0.0/Foo.1.0.0.nupkg", addr);

        let temp_dir = tempfile::tempdir().unwrap();
        let dest = temp_dir.path().join("refused.part");

        let err = fetcher().fetch(&url, &dest).await.unwrap_err();

        assert!(matches!(err, FetchError::Network(_)), "got {err:?}");
        assert_eq!(classify(&err), FetchOutcome::RealFailure);
        assert!(err.is_retryable());
    }
}
