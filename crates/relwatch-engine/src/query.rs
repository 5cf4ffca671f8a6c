//! Query resolution: blacklist application and latest-version selection.
//!
//! This is the single query implementation; every transport (wire
//! handler, in-process caller) goes through [`QueryEngine::process_query`].

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use relwatch_codec::wire::{ArtifactResponse, QueryRequest, QueryResponse, UpdateAvailable};
use relwatch_core::blacklist::Blacklist;
use relwatch_core::coordinate::{is_release_version, is_snapshot_version, Coordinate};
use relwatch_core::stale;
use relwatch_core::version::{compare_version_strings, Version, VersionInfo};

use crate::tracker::{StalePredicate, VersionTracker};

/// Turns query requests into per-artifact update answers.
pub struct QueryEngine {
    tracker: Arc<VersionTracker>,
    server_blacklist: Arc<Blacklist>,
    delay_after_success: Duration,
    delay_after_failure: Duration,
}

impl QueryEngine {
    pub fn new(
        tracker: Arc<VersionTracker>,
        server_blacklist: Arc<Blacklist>,
        delay_after_success: Duration,
        delay_after_failure: Duration,
    ) -> Self {
        Self {
            tracker,
            server_blacklist,
            delay_after_success,
            delay_after_failure,
        }
    }

    pub async fn process_query(&self, request: &QueryRequest) -> QueryResponse {
        // Every coordinate resolves through the cache, fully blacklisted
        // ones included. The fetcher's blacklist short-circuit is the one
        // place upstream calls are skipped, so cached records stay
        // visible to the response.
        let records = self
            .tracker
            .get_version_info(&request.artifacts, self.stale_predicate())
            .await;

        let artifacts = request
            .artifacts
            .iter()
            .map(|coord| {
                build_response(
                    coord,
                    records.get(coord),
                    &self.server_blacklist,
                    request.blacklist.as_ref(),
                )
            })
            .collect();
        QueryResponse { artifacts }
    }

    fn stale_predicate(&self) -> StalePredicate {
        let after_success = self.delay_after_success;
        let after_failure = self.delay_after_failure;
        Arc::new(move |coord, info| {
            let now = Utc::now();
            stale::is_stale(info, after_success, after_failure, now)
                || stale::needs_release_dates(info, coord, after_success, after_failure, now)
        })
    }
}

fn build_response(
    coord: &Coordinate,
    record: Option<&VersionInfo>,
    server_blacklist: &Blacklist,
    request_blacklist: Option<&Blacklist>,
) -> ArtifactResponse {
    let Some(record) = record.filter(|r| !r.versions.is_empty()) else {
        return ArtifactResponse {
            artifact: coord.clone(),
            current_version: None,
            latest_version: None,
            update_available: UpdateAvailable::NotFound,
        };
    };

    let mut blacklists: Vec<&Blacklist> = vec![server_blacklist];
    blacklists.extend(request_blacklist);
    let accepts: fn(&str) -> bool = if coord.is_release() {
        is_release_version
    } else {
        is_snapshot_version
    };
    let latest = select_latest(record, &blacklists, accepts);
    let requested = coord
        .version
        .as_deref()
        .filter(|v| !v.trim().is_empty());
    let current_version = requested.and_then(|v| record.get_version(v)).cloned();

    let update_available = match (requested, latest.as_ref()) {
        (None, _) | (_, None) => UpdateAvailable::Maybe,
        (Some(current), Some(latest)) => {
            if compare_version_strings(current, &latest.version_string) == Ordering::Less {
                UpdateAvailable::Yes
            } else {
                UpdateAvailable::No
            }
        }
    };

    ArtifactResponse {
        artifact: coord.clone(),
        current_version,
        latest_version: latest,
        update_available,
    }
}

/// The maximal release version not excluded by the blacklist.
pub fn find_latest_release(record: &VersionInfo, blacklist: Option<&Blacklist>) -> Option<Version> {
    let blacklists: Vec<&Blacklist> = blacklist.into_iter().collect();
    select_latest(record, &blacklists, is_release_version)
}

/// The maximal snapshot version not excluded by the blacklist.
pub fn find_latest_snapshot(
    record: &VersionInfo,
    blacklist: Option<&Blacklist>,
) -> Option<Version> {
    let blacklists: Vec<&Blacklist> = blacklist.into_iter().collect();
    select_latest(record, &blacklists, is_snapshot_version)
}

fn select_latest(
    record: &VersionInfo,
    blacklists: &[&Blacklist],
    accepts: fn(&str) -> bool,
) -> Option<Version> {
    record
        .versions
        .iter()
        .filter(|v| accepts(&v.version_string))
        .filter(|v| {
            !blacklists.iter().any(|b| {
                b.is_version_blacklisted(
                    &record.artifact.group_id,
                    &record.artifact.artifact_id,
                    &v.version_string,
                )
            })
        })
        .max()
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use relwatch_core::blacklist::MatchKind;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record_with(versions: &[(&str, i64)]) -> VersionInfo {
        let mut info = VersionInfo::new(Coordinate::new("com.example", "lib"), at(0));
        for (name, secs) in versions {
            info.add_version(Version::with_release_date(*name, at(*secs)));
        }
        info
    }

    #[test]
    fn latest_release_is_the_comparator_maximum() {
        let record = record_with(&[("1.0", 10), ("1.10", 30), ("1.9", 20), ("2.0-rc1", 40)]);
        let latest = find_latest_release(&record, None).unwrap();
        assert_eq!(latest.version_string, "1.10");
    }

    #[test]
    fn latest_snapshot_ignores_releases() {
        let record = record_with(&[("1.0", 10), ("1.1-SNAPSHOT", 20), ("0.9-SNAPSHOT", 5)]);
        let latest = find_latest_snapshot(&record, None).unwrap();
        assert_eq!(latest.version_string, "1.1-SNAPSHOT");
    }

    #[test]
    fn blacklist_excludes_candidates() {
        let record = record_with(&[("1.0", 10), ("2.0", 20)]);
        let mut blacklist = Blacklist::new();
        blacklist
            .add_ignored_version("2\\..*", MatchKind::Regex)
            .unwrap();

        let latest = find_latest_release(&record, Some(&blacklist)).unwrap();
        assert_eq!(latest.version_string, "1.0");
    }

    #[test]
    fn everything_blacklisted_means_no_latest() {
        let record = record_with(&[("1.0", 10)]);
        let mut blacklist = Blacklist::new();
        blacklist
            .add_ignored_version(".*", MatchKind::Regex)
            .unwrap();
        assert!(find_latest_release(&record, Some(&blacklist)).is_none());
    }

    #[test]
    fn empty_record_is_not_found() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0");
        let record = record_with(&[]);
        let response = build_response(&coord, Some(&record), &Blacklist::new(), None);
        assert_eq!(response.update_available, UpdateAvailable::NotFound);
    }

    #[test]
    fn missing_record_is_not_found() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0");
        let response = build_response(&coord, None, &Blacklist::new(), None);
        assert_eq!(response.update_available, UpdateAvailable::NotFound);
        assert!(response.current_version.is_none());
        assert!(response.latest_version.is_none());
    }

    #[test]
    fn newer_version_available_is_yes() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0");
        let record = record_with(&[("1.0", 10), ("1.1", 20)]);
        let response = build_response(&coord, Some(&record), &Blacklist::new(), None);
        assert_eq!(response.update_available, UpdateAvailable::Yes);
        assert_eq!(
            response.latest_version.as_ref().unwrap().version_string,
            "1.1"
        );
        assert_eq!(
            response.current_version.as_ref().unwrap().version_string,
            "1.0"
        );
    }

    #[test]
    fn current_at_latest_is_no() {
        let coord = Coordinate::with_version("com.example", "lib", "1.1");
        let record = record_with(&[("1.0", 10), ("1.1", 20)]);
        let response = build_response(&coord, Some(&record), &Blacklist::new(), None);
        assert_eq!(response.update_available, UpdateAvailable::No);
    }

    #[test]
    fn unknown_current_version_still_compares_against_latest() {
        let coord = Coordinate::with_version("com.example", "lib", "0.5");
        let record = record_with(&[("1.0", 10)]);
        let response = build_response(&coord, Some(&record), &Blacklist::new(), None);
        assert!(response.current_version.is_none());
        assert_eq!(response.update_available, UpdateAvailable::Yes);
    }

    #[test]
    fn versionless_query_is_maybe() {
        let coord = Coordinate::new("com.example", "lib");
        let record = record_with(&[("1.0", 10)]);
        let response = build_response(&coord, Some(&record), &Blacklist::new(), None);
        assert_eq!(response.update_available, UpdateAvailable::Maybe);
    }

    #[test]
    fn fully_blacklisted_latest_is_maybe() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0");
        let record = record_with(&[("1.0", 10), ("2.0", 20)]);
        let mut blacklist = Blacklist::new();
        blacklist
            .add_ignored_version(".*", MatchKind::Regex)
            .unwrap();
        let response = build_response(&coord, Some(&record), &Blacklist::new(), Some(&blacklist));
        assert_eq!(response.update_available, UpdateAvailable::Maybe);
    }

    #[test]
    fn server_blacklist_filters_latest_selection() {
        let coord = Coordinate::with_version("com.banned", "lib", "1.0");
        let mut record = VersionInfo::new(Coordinate::new("com.banned", "lib"), at(0));
        record.add_version(Version::with_release_date("1.0", at(10)));
        record.add_version(Version::with_release_date("2.0", at(20)));

        let mut server = Blacklist::new();
        server.add_blacklisted_group("com.banned");

        let response = build_response(&coord, Some(&record), &server, None);
        assert!(response.latest_version.is_none());
        assert_eq!(response.update_available, UpdateAvailable::Maybe);
        // the cached entry itself stays visible
        assert_eq!(
            response.current_version.as_ref().unwrap().version_string,
            "1.0"
        );
    }

    #[test]
    fn snapshot_coordinate_selects_snapshot_latest() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0-SNAPSHOT");
        let record = record_with(&[("1.0-SNAPSHOT", 10), ("1.1-SNAPSHOT", 20), ("2.0", 30)]);
        let response = build_response(&coord, Some(&record), &Blacklist::new(), None);
        assert_eq!(
            response.latest_version.as_ref().unwrap().version_string,
            "1.1-SNAPSHOT"
        );
        assert_eq!(response.update_available, UpdateAvailable::Yes);
    }
}
