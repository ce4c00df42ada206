//! Arrival-log records and the line parser

use super::version::NuGetVersion;
use crate::error::ParseError;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

/// Longest package id NuGet accepts
pub const MAX_PACKAGE_ID_LEN: usize = 100;

// Static pattern, verified by the tests below.
#[allow(clippy::unwrap_used)]
static PACKAGE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+(?:[.-][A-Za-z0-9_]+)*$").unwrap());

/// Offset-less timestamp layouts accepted in addition to RFC 3339; read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One package version as announced by an arrival log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Package identity, as written in the log
    pub package_id: String,
    /// Parsed version
    pub version: NuGetVersion,
    /// Publish/registration instant used to resolve conflicting records
    pub commit_timestamp: DateTime<FixedOffset>,
}

impl VersionRecord {
    /// Build a record from already-parsed parts
    pub fn new(
        package_id: impl Into<String>,
        version: NuGetVersion,
        commit_timestamp: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            package_id: package_id.into(),
            version,
            commit_timestamp,
        }
    }

    /// Canonical version string; together with `package_id` this names the catalog slot
    pub fn version_key(&self) -> String {
        self.version.to_normalized_string()
    }
}

/// Parse one `<id> <version> <timestamp>` line
///
/// Splitting stops after the second field: everything after it, trimmed, is the
/// timestamp. Runs of whitespace between fields count as one separator.
pub fn parse_line(line: &str) -> Result<VersionRecord, ParseError> {
    let (package_id, rest) = next_field(line).ok_or(ParseError::MissingFields { found: 0 })?;
    let (version, rest) = next_field(rest).ok_or(ParseError::MissingFields { found: 1 })?;
    let timestamp = rest.trim();
    if timestamp.is_empty() {
        return Err(ParseError::MissingFields { found: 2 });
    }

    if !is_valid_package_id(package_id) {
        return Err(ParseError::InvalidId(package_id.to_string()));
    }

    Ok(VersionRecord {
        package_id: package_id.to_string(),
        version: NuGetVersion::parse(version)?,
        commit_timestamp: parse_timestamp(timestamp)?,
    })
}

/// True if `id` follows the NuGet id grammar
///
/// Runs of letters, digits and `_` joined by single `.` or `-`, at most
/// [`MAX_PACKAGE_ID_LEN`] characters. Such an id can never contain a path
/// separator or a `..` component, so it is safe as a file-name prefix.
pub fn is_valid_package_id(id: &str) -> bool {
    id.len() <= MAX_PACKAGE_ID_LEN && PACKAGE_ID_RE.is_match(id)
}

fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some(s.split_at(end))
}

/// Parse an instant in round-trip form, with or without an offset
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>, ParseError> {
    let rfc3339_err = match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => return Ok(ts),
        Err(e) => e,
    };

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
        .ok_or_else(|| ParseError::InvalidTimestamp {
            value: value.to_string(),
            reason: rfc3339_err.to_string(),
        })
}
