//! Version records and the numeric-aware version ordering.
//!
//! Version strings are compared by splitting them into maximal runs of
//! ASCII digits and runs of everything else, then comparing the runs
//! positionally: numerically when both runs parse as integers,
//! lexicographically otherwise. A string that exhausts first compares
//! smaller.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinate::Coordinate;

/// A single published version of an artifact as reported upstream.
///
/// Equality, hashing, and ordering consider only the version string; the
/// dates are bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version_string: String,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_seen_by_server: Option<DateTime<Utc>>,
}

impl Version {
    pub fn new(version_string: impl Into<String>) -> Self {
        Self {
            version_string: version_string.into(),
            release_date: None,
            first_seen_by_server: None,
        }
    }

    pub fn with_release_date(
        version_string: impl Into<String>,
        release_date: DateTime<Utc>,
    ) -> Self {
        Self {
            release_date: Some(release_date),
            ..Self::new(version_string)
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.version_string == other.version_string
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version_string.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_version_strings(&self.version_string, &other.version_string)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.version_string)
    }
}

/// Compare two version strings with the digit-run aware ordering.
pub fn compare_version_strings(a: &str, b: &str) -> Ordering {
    let runs_a = split_runs(a);
    let runs_b = split_runs(b);

    for (ra, rb) in runs_a.iter().zip(runs_b.iter()) {
        let ord = match (ra.parse::<u64>(), rb.parse::<u64>()) {
            (Ok(na), Ok(nb)) => na.cmp(&nb),
            _ => ra.cmp(rb),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    runs_a.len().cmp(&runs_b.len())
}

/// Split into maximal runs of ASCII digits and runs of everything else.
fn split_runs(s: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut digits = None;

    for (i, ch) in s.char_indices() {
        let is_digit = ch.is_ascii_digit();
        match digits {
            Some(prev) if prev != is_digit => {
                runs.push(&s[start..i]);
                start = i;
            }
            _ => {}
        }
        digits = Some(is_digit);
    }
    if digits.is_some() {
        runs.push(&s[start..]);
    }
    runs
}

/// The cached record for one (group, artifact): everything the server knows
/// about its published versions and poll history.
///
/// The `artifact` coordinate is stored without a version. The latest
/// release/snapshot fields name entries of `versions`; resolve them with
/// [`latest_release`](VersionInfo::latest_release) and
/// [`latest_snapshot`](VersionInfo::latest_snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub artifact: Coordinate,
    pub creation_date: DateTime<Utc>,
    pub last_request_date: DateTime<Utc>,
    #[serde(default)]
    pub last_success_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_repository_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_release_version: Option<String>,
    #[serde(default)]
    pub latest_snapshot_version: Option<String>,
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl VersionInfo {
    /// A fresh record for a coordinate that has never been polled.
    pub fn new(artifact: Coordinate, now: DateTime<Utc>) -> Self {
        Self {
            artifact: artifact.without_version(),
            creation_date: now,
            last_request_date: now,
            last_success_date: None,
            last_failure_date: None,
            last_repository_update: None,
            latest_release_version: None,
            latest_snapshot_version: None,
            versions: Vec::new(),
        }
    }

    /// The more recent of the last successful and last failed poll, if any.
    pub fn last_polled_date(&self) -> Option<DateTime<Utc>> {
        match (self.last_success_date, self.last_failure_date) {
            (Some(s), Some(f)) => Some(s.max(f)),
            (Some(s), None) => Some(s),
            (None, Some(f)) => Some(f),
            (None, None) => None,
        }
    }

    /// Whether this record has never been polled.
    pub fn is_new_item(&self) -> bool {
        self.last_polled_date().is_none()
    }

    /// Look up a version entry by its version string.
    pub fn get_version(&self, version: &str) -> Option<&Version> {
        self.versions.iter().find(|v| v.version_string == version)
    }

    pub fn get_version_mut(&mut self, version: &str) -> Option<&mut Version> {
        self.versions
            .iter_mut()
            .find(|v| v.version_string == version)
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.get_version(version).is_some()
    }

    /// Add a version unless one with the same version string exists.
    /// Returns whether the entry was inserted.
    pub fn add_version(&mut self, version: Version) -> bool {
        if self.has_version(&version.version_string) {
            return false;
        }
        self.versions.push(version);
        true
    }

    /// The entry named by `latest_release_version`, when present.
    pub fn latest_release(&self) -> Option<&Version> {
        self.latest_release_version
            .as_deref()
            .and_then(|v| self.get_version(v))
    }

    /// The entry named by `latest_snapshot_version`, when present.
    pub fn latest_snapshot(&self) -> Option<&Version> {
        self.latest_snapshot_version
            .as_deref()
            .and_then(|v| self.get_version(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn numeric_ordering() {
        assert_eq!(compare_version_strings("1.0", "2.0"), Ordering::Less);
        assert_eq!(compare_version_strings("1.9", "1.10"), Ordering::Less);
        assert_eq!(compare_version_strings("3.11", "3.12.0"), Ordering::Less);
        assert_eq!(compare_version_strings("2.0", "2.0"), Ordering::Equal);
    }

    #[test]
    fn prefix_is_smaller() {
        assert_eq!(compare_version_strings("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_version_strings("1.0-rc", "1.0-rc1"), Ordering::Less);
    }

    #[test]
    fn mixed_runs_compare_lexicographically() {
        assert_eq!(compare_version_strings("1.0a", "1.0b"), Ordering::Less);
        // "31.0-jre" vs "32.0-jre": first digit run decides
        assert_eq!(compare_version_strings("31.0-jre", "32.0-jre"), Ordering::Less);
    }

    #[test]
    fn leading_zeros_compare_numerically() {
        assert_eq!(compare_version_strings("1.01", "1.1"), Ordering::Equal);
    }

    #[test]
    fn version_equality_by_string_only() {
        let a = Version::with_release_date("1.0", at(100));
        let b = Version::new("1.0");
        assert_eq!(a, b);
        assert_ne!(a, Version::new("1.1"));
    }

    #[test]
    fn last_polled_is_max_of_success_and_failure() {
        let coord = Coordinate::new("com.example", "lib");
        let mut info = VersionInfo::new(coord, at(0));
        assert!(info.is_new_item());
        assert_eq!(info.last_polled_date(), None);

        info.last_failure_date = Some(at(10));
        assert_eq!(info.last_polled_date(), Some(at(10)));
        assert!(!info.is_new_item());

        info.last_success_date = Some(at(20));
        assert_eq!(info.last_polled_date(), Some(at(20)));
    }

    #[test]
    fn add_version_is_unique_by_string() {
        let mut info = VersionInfo::new(Coordinate::new("com.example", "lib"), at(0));
        assert!(info.add_version(Version::new("1.0")));
        assert!(!info.add_version(Version::with_release_date("1.0", at(5))));
        assert_eq!(info.versions.len(), 1);
    }

    #[test]
    fn latest_pointers_resolve_into_versions() {
        let mut info = VersionInfo::new(Coordinate::new("com.example", "lib"), at(0));
        info.add_version(Version::new("1.0"));
        info.add_version(Version::new("1.1-SNAPSHOT"));
        info.latest_release_version = Some("1.0".to_string());
        info.latest_snapshot_version = Some("1.1-SNAPSHOT".to_string());

        assert_eq!(info.latest_release().unwrap().version_string, "1.0");
        assert_eq!(
            info.latest_snapshot().unwrap().version_string,
            "1.1-SNAPSHOT"
        );

        info.latest_release_version = Some("9.9".to_string());
        assert!(info.latest_release().is_none());
    }

    #[test]
    fn new_record_strips_version_from_coordinate() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0");
        let info = VersionInfo::new(coord, at(0));
        assert!(info.artifact.version.is_none());
    }
}
