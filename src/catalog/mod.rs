//! In-memory catalog of the latest known record per package version
//!
//! The catalog is rebuilt every cycle from the arrival logs that are present. For
//! each `(package id, canonical version)` slot it keeps the record with the
//! greatest commit timestamp; a later record with an *equal* timestamp does not
//! displace the one already stored.

mod record;
mod version;

pub use record::{
    MAX_PACKAGE_ID_LEN, VersionRecord, is_valid_package_id, parse_line, parse_timestamp,
};
pub use version::NuGetVersion;

use std::collections::{BTreeMap, HashMap};

/// What [`Catalog::merge`] did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The slot was empty
    Inserted,
    /// The record was strictly newer than the stored one
    Replaced,
    /// The stored record is as new or newer
    Kept,
}

/// Versions of one package, in first-seen order
#[derive(Debug, Clone, Default)]
struct PackageVersions {
    order: Vec<String>,
    records: HashMap<String, VersionRecord>,
}

/// Mapping from package id to version key to winning [`VersionRecord`]
///
/// Packages iterate in id order; versions of a package iterate in the order their
/// slot was first filled.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: BTreeMap<String, PackageVersions>,
    versions: usize,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the catalog
    pub fn merge(&mut self, record: VersionRecord) -> MergeOutcome {
        let key = record.version_key();
        let package = self.packages.entry(record.package_id.clone()).or_default();

        match package.records.get_mut(&key) {
            Some(existing) => {
                if record.commit_timestamp > existing.commit_timestamp {
                    *existing = record;
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Kept
                }
            }
            None => {
                package.order.push(key.clone());
                package.records.insert(key, record);
                self.versions += 1;
                MergeOutcome::Inserted
            }
        }
    }

    /// Fold every record of `other` into this catalog, in `other`'s iteration order
    pub fn absorb(&mut self, other: Catalog) {
        for (_, mut package) in other.packages {
            for key in package.order {
                if let Some(record) = package.records.remove(&key) {
                    self.merge(record);
                }
            }
        }
    }

    /// Look up the winning record for a slot
    pub fn get(&self, package_id: &str, version_key: &str) -> Option<&VersionRecord> {
        self.packages
            .get(package_id)
            .and_then(|p| p.records.get(version_key))
    }

    /// Number of distinct package ids
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Number of filled `(package, version)` slots
    pub fn version_count(&self) -> usize {
        self.versions
    }

    /// True if nothing has been merged
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Drop all records
    pub fn clear(&mut self) {
        self.packages.clear();
        self.versions = 0;
    }

    /// Iterate the versions recorded for one package
    pub fn versions_of<'a>(
        &'a self,
        package_id: &'a str,
    ) -> impl Iterator<Item = &'a VersionRecord> + 'a {
        self.packages
            .get(package_id)
            .into_iter()
            .flat_map(|p| p.order.iter().filter_map(move |k| p.records.get(k)))
    }

    /// Split the catalog into one [`DownloadTask`] per package
    pub fn into_tasks(self) -> Vec<DownloadTask> {
        self.packages
            .into_iter()
            .map(|(package_id, mut package)| {
                let versions = package
                    .order
                    .iter()
                    .filter_map(|k| package.records.remove(k))
                    .collect();
                DownloadTask {
                    package_id,
                    versions,
                }
            })
            .collect()
    }
}

/// All versions of one package to be mirrored, fetched in order by a single worker
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Package id
    pub package_id: String,
    /// Winning records, in catalog order
    pub versions: Vec<VersionRecord>,
}
