//! Tracker configuration loaded from a `KEY=value` properties stream.

use std::path::{Path, PathBuf};
use std::time::Duration;

use relwatch_util::errors::RelwatchError;

/// Maven Central index base URL.
pub const DEFAULT_INDEX_URL: &str = "https://repo.maven.apache.org/maven2";

/// Maven Central search REST endpoint.
pub const DEFAULT_SEARCH_URL: &str = "https://search.maven.org/solrsearch/select";

/// Engine configuration.
///
/// The properties surface recognizes `updateDelayAfterFailure`,
/// `updateDelayAfterSuccess`, `bgUpdateCheckInterval` (durations) and
/// `blacklistedGroupIds` (comma/space separated). Unknown keys are ignored
/// with a warning.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum delay before retrying after a failed poll.
    pub update_delay_after_failure: Duration,
    /// Minimum delay before re-polling after a success.
    pub update_delay_after_success: Duration,
    /// Sleep interval between background refresh sweeps.
    pub bg_update_check_interval: Duration,
    /// Group ids whose artifacts are never fetched upstream.
    pub blacklisted_group_ids: Vec<String>,
    /// Base URL of the upstream index.
    pub index_url: String,
    /// Base URL of the search REST endpoint.
    pub search_url: String,
    /// Path of the version store file.
    pub store_path: PathBuf,
    /// Interval between write-back cache flushes.
    pub flush_interval: Duration,
    /// Concurrent upstream updates driven by client queries.
    pub tracker_pool_size: usize,
    /// Concurrent upstream updates driven by the background refresher.
    pub refresher_pool_size: usize,
    /// Concurrent page fetches against the search REST endpoint.
    pub search_pool_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            update_delay_after_failure: Duration::from_secs(3600),
            update_delay_after_success: Duration::from_secs(86_400),
            bg_update_check_interval: Duration::from_secs(60),
            blacklisted_group_ids: Vec::new(),
            index_url: DEFAULT_INDEX_URL.to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            store_path: default_store_path(),
            flush_interval: Duration::from_secs(10),
            tracker_pool_size: 2 * cores,
            refresher_pool_size: cores,
            search_pool_size: 10,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a locator: `file:<path>` or a bare path.
    pub fn load(locator: &str) -> miette::Result<Self> {
        let path = locator.strip_prefix("file:").unwrap_or(locator);
        let content =
            std::fs::read_to_string(Path::new(path)).map_err(|e| RelwatchError::Config {
                message: format!("failed to read properties from {path}: {e}"),
            })?;
        Self::from_properties(&content)
    }

    /// Parse a properties stream (`KEY=value` lines, `#` comments).
    pub fn from_properties(content: &str) -> miette::Result<Self> {
        let mut config = Self::default();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(RelwatchError::Config {
                    message: format!("malformed properties line: {trimmed:?}"),
                }
                .into());
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "updateDelayAfterFailure" => {
                    config.update_delay_after_failure = parse_duration(value)?;
                }
                "updateDelayAfterSuccess" => {
                    config.update_delay_after_success = parse_duration(value)?;
                }
                "bgUpdateCheckInterval" => {
                    config.bg_update_check_interval = parse_duration(value)?;
                }
                "blacklistedGroupIds" => {
                    config.blacklisted_group_ids = value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => tracing::warn!(key, "ignoring unknown configuration key"),
            }
        }
        Ok(config)
    }
}

/// The legacy store location under the user's Maven directory.
pub fn default_store_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".m2").join("artifacts.json")
}

/// Parse a duration literal `<integer><s|m|h|d>`, case-insensitive.
pub fn parse_duration(s: &str) -> miette::Result<Duration> {
    let s = s.trim();
    let invalid = || RelwatchError::Config {
        message: format!("invalid duration literal {s:?}, expected <integer><s|m|h|d>"),
    };

    let (digits, unit) = s.split_at(s.len().saturating_sub(1));
    let count: u64 = digits.parse().map_err(|_| invalid())?;
    let seconds = match unit.to_ascii_lowercase().as_str() {
        "s" => count,
        "m" => count * 60,
        "h" => count * 3600,
        "d" => count * 86_400,
        _ => return Err(invalid().into()),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2H").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("d").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("-5s").is_err());
    }
}
