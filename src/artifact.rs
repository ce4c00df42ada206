//! Artifact naming
//!
//! [`ArtifactLayout::locate`] is the only place an artifact's file name, remote URL
//! and local path are derived. The existence check and the fetch destination both
//! go through it, so they can never disagree.

use crate::catalog::NuGetVersion;
use crate::config::Config;
use std::path::{Path, PathBuf};

/// Suffix of the in-progress file an artifact is streamed into before the final rename
const PARTIAL_SUFFIX: &str = "part";

/// Where one package version lives remotely and locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    /// `<id>.<version>.<ext>`
    pub file_name: String,
    /// `<prefix>/<id>/<version>/<id>.<version>.<ext>`
    pub url: String,
    /// `<store_dir>/<id>.<version>.<ext>`
    pub local_path: PathBuf,
}

impl ArtifactLocation {
    /// Sibling path the fetcher writes to before renaming onto `local_path`
    pub fn partial_path(&self) -> PathBuf {
        self.local_path
            .with_file_name(format!("{}.{}", self.file_name, PARTIAL_SUFFIX))
    }
}

/// Fixed naming template shared by every worker
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    url_prefix: String,
    store_dir: PathBuf,
    extension: String,
}

impl ArtifactLayout {
    /// Create a layout; `url_prefix` is normalized to end with exactly one `/`
    pub fn new(
        url_prefix: impl AsRef<str>,
        store_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        let mut url_prefix = url_prefix.as_ref().trim_end_matches('/').to_string();
        url_prefix.push('/');
        Self {
            url_prefix,
            store_dir: store_dir.into(),
            extension: extension.into(),
        }
    }

    /// Layout described by the `remote` and `paths` sections of a config
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.remote.url_prefix,
            config.paths.store_dir.clone(),
            config.remote.artifact_extension.clone(),
        )
    }

    /// The local store directory
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Derive the location of one package version
    pub fn locate(&self, package_id: &str, version: &NuGetVersion) -> ArtifactLocation {
        let version = version.to_normalized_string();
        let file_name = format!("{}.{}.{}", package_id, version, self.extension);
        let url = format!("{}{}/{}/{}", self.url_prefix, package_id, version, file_name);
        let local_path = self.store_dir.join(&file_name);
        ArtifactLocation {
            file_name,
            url,
            local_path,
        }
    }
}
