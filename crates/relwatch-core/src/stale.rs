//! Pure staleness predicates.

use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, Utc};

use crate::coordinate::Coordinate;
use crate::version::VersionInfo;

/// Whether a record is due for a refresh.
///
/// A never-polled record is always stale. Otherwise the more recent of the
/// last success and last failure decides which delay applies.
pub fn is_stale(
    info: &VersionInfo,
    delay_after_success: Duration,
    delay_after_failure: Duration,
    now: DateTime<Utc>,
) -> bool {
    match (info.last_success_date, info.last_failure_date) {
        (None, None) => true,
        (Some(success), Some(failure)) => {
            if success >= failure {
                elapsed(success, now) > delta(delay_after_success)
            } else {
                elapsed(failure, now) > delta(delay_after_failure)
            }
        }
        (None, Some(failure)) => elapsed(failure, now) > delta(delay_after_failure),
        (Some(success), None) => elapsed(success, now) > delta(delay_after_success),
    }
}

/// Whether a record should be re-fetched to recover missing release dates
/// for this coordinate.
///
/// True when any of the record's versions, its latest release, its latest
/// snapshot, or the entry for the requested version lacks a release date,
/// provided the applicable delay has elapsed since the last poll.
pub fn needs_release_dates(
    info: &VersionInfo,
    coord: &Coordinate,
    delay_after_success: Duration,
    delay_after_failure: Duration,
    now: DateTime<Utc>,
) -> bool {
    let missing = info.versions.iter().any(|v| v.release_date.is_none())
        || info
            .latest_release()
            .is_some_and(|v| v.release_date.is_none())
        || info
            .latest_snapshot()
            .is_some_and(|v| v.release_date.is_none())
        || coord
            .version
            .as_deref()
            .and_then(|v| info.get_version(v))
            .is_some_and(|v| v.release_date.is_none());

    missing && is_stale(info, delay_after_success, delay_after_failure, now)
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    now - since
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
