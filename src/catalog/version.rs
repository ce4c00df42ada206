//! NuGet package versions
//!
//! Grammar: one to four dot-separated numeric parts, an optional `-prerelease`
//! label and optional `+metadata`. Missing numeric parts are zero, so `1.0`,
//! `1.0.0` and `1.0.0.0` all denote the same version.

use crate::error::ParseError;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

// Static pattern, verified by the tests below.
#[allow(clippy::unwrap_used)]
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<nums>\d+(?:\.\d+){0,3})(?:-(?P<pre>[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?(?:\+(?P<meta>[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?$",
    )
    .unwrap()
});

/// A parsed NuGet version
///
/// Ordering follows NuGet's default comparer: numeric parts first, then a release
/// sorts above any prerelease of the same numbers, then prerelease identifiers are
/// compared one by one (numeric identifiers numerically and below alphanumeric ones,
/// alphanumeric identifiers case-insensitively). Build metadata is ignored.
#[derive(Debug, Clone)]
pub struct NuGetVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    release: Vec<String>,
    metadata: Option<String>,
}

impl NuGetVersion {
    /// Parse a version string
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let caps = VERSION_RE
            .captures(input)
            .ok_or_else(|| ParseError::InvalidVersion(input.to_string()))?;

        let mut parts = [0u64; 4];
        for (slot, text) in parts.iter_mut().zip(caps["nums"].split('.')) {
            *slot = text
                .parse()
                .map_err(|_| ParseError::InvalidVersion(input.to_string()))?;
        }

        let release = caps
            .name("pre")
            .map(|m| m.as_str().split('.').map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            revision: parts[3],
            release,
            metadata: caps.name("meta").map(|m| m.as_str().to_string()),
        })
    }

    /// Major version number
    pub fn major(&self) -> u64 {
        self.major
    }

    /// Minor version number
    pub fn minor(&self) -> u64 {
        self.minor
    }

    /// Patch version number
    pub fn patch(&self) -> u64 {
        self.patch
    }

    /// Fourth (legacy) version part, zero when absent
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True if the version carries a prerelease label
    pub fn is_prerelease(&self) -> bool {
        !self.release.is_empty()
    }

    /// Build metadata after `+`, if any
    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    /// Canonical form: `major.minor.patch[.revision][-label]`
    ///
    /// The revision is only written when non-zero, leading zeros are dropped and
    /// metadata is omitted. This string is the catalog slot key and the version
    /// segment of artifact names and URLs.
    pub fn to_normalized_string(&self) -> String {
        let mut s = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if self.revision != 0 {
            s.push('.');
            s.push_str(&self.revision.to_string());
        }
        if self.is_prerelease() {
            s.push('-');
            s.push_str(&self.release.join("."));
        }
        s
    }
}

impl FromStr for NuGetVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NuGetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized_string())
    }
}

fn compare_identifier(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(b.bytes().map(|c| c.to_ascii_lowercase())),
    }
}

fn compare_release(a: &[String], b: &[String]) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    for (x, y) in a.iter().zip(b) {
        let ord = compare_identifier(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl Ord for NuGetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| compare_release(&self.release, &other.release))
    }
}

impl PartialOrd for NuGetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NuGetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NuGetVersion {}
