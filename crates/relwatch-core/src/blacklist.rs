//! Version-ignore rules keyed globally, by group, or by group and artifact.
//!
//! Matchers are exact strings or anchored regular expressions. A group key
//! matches its exact group id and any descendant (`com.example` also
//! covers `com.example.internal`); when several group keys match, the
//! longest one wins. The special NEVER matcher (regex `.*`) expresses
//! "every version of this artifact is ignored".

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use relwatch_util::errors::RelwatchError;

/// The pattern of the NEVER matcher.
pub const NEVER_PATTERN: &str = ".*";

/// How a blacklist pattern matches candidate version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Regex,
}

/// A single version-ignore rule.
///
/// Regex patterns must match the whole version string. The compiled regex
/// is built at insertion so invalid patterns are rejected at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MatcherSpec", into = "MatcherSpec")]
pub struct VersionMatcher {
    kind: MatchKind,
    pattern: String,
    compiled: Option<Regex>,
}

/// The serialized form of a matcher: kind and pattern only.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatcherSpec {
    kind: MatchKind,
    pattern: String,
}

impl TryFrom<MatcherSpec> for VersionMatcher {
    type Error = RelwatchError;

    fn try_from(spec: MatcherSpec) -> Result<Self, Self::Error> {
        VersionMatcher::new(spec.pattern, spec.kind)
    }
}

impl From<VersionMatcher> for MatcherSpec {
    fn from(matcher: VersionMatcher) -> Self {
        Self {
            kind: matcher.kind,
            pattern: matcher.pattern,
        }
    }
}

impl VersionMatcher {
    pub fn new(pattern: impl Into<String>, kind: MatchKind) -> Result<Self, RelwatchError> {
        let pattern = pattern.into();
        let compiled = match kind {
            MatchKind::Exact => None,
            MatchKind::Regex => {
                let anchored = format!("^(?:{pattern})$");
                let regex = Regex::new(&anchored).map_err(|e| RelwatchError::Config {
                    message: format!("invalid blacklist regex {pattern:?}: {e}"),
                })?;
                Some(regex)
            }
        };
        Ok(Self {
            kind,
            pattern,
            compiled,
        })
    }

    /// The matcher that ignores every version.
    pub fn never() -> Self {
        Self::new(NEVER_PATTERN, MatchKind::Regex).expect("the NEVER pattern is a valid regex")
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_never(&self) -> bool {
        self.kind == MatchKind::Regex && self.pattern == NEVER_PATTERN
    }

    pub fn matches(&self, version: &str) -> bool {
        match (&self.kind, &self.compiled) {
            (MatchKind::Exact, _) => self.pattern == version,
            (MatchKind::Regex, Some(regex)) => regex.is_match(version),
            (MatchKind::Regex, None) => false,
        }
    }
}

/// Version-ignore rules in three scopes: global, per group, per
/// group and artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blacklist {
    #[serde(default)]
    global: Vec<VersionMatcher>,
    #[serde(default)]
    by_group: BTreeMap<String, Vec<VersionMatcher>>,
    #[serde(default)]
    by_artifact: BTreeMap<String, BTreeMap<String, Vec<VersionMatcher>>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.by_group.is_empty() && self.by_artifact.is_empty()
    }

    /// Ignore versions matching `pattern` for every artifact.
    pub fn add_ignored_version(
        &mut self,
        pattern: impl Into<String>,
        kind: MatchKind,
    ) -> Result<(), RelwatchError> {
        self.global.push(VersionMatcher::new(pattern, kind)?);
        Ok(())
    }

    /// Ignore versions matching `pattern` for a group and its descendants.
    pub fn add_ignored_group_version(
        &mut self,
        group: impl Into<String>,
        pattern: impl Into<String>,
        kind: MatchKind,
    ) -> Result<(), RelwatchError> {
        self.by_group
            .entry(group.into())
            .or_default()
            .push(VersionMatcher::new(pattern, kind)?);
        Ok(())
    }

    /// Ignore versions matching `pattern` for one (group, artifact).
    pub fn add_ignored_artifact_version(
        &mut self,
        group: impl Into<String>,
        artifact: impl Into<String>,
        pattern: impl Into<String>,
        kind: MatchKind,
    ) -> Result<(), RelwatchError> {
        self.by_artifact
            .entry(group.into())
            .or_default()
            .entry(artifact.into())
            .or_default()
            .push(VersionMatcher::new(pattern, kind)?);
        Ok(())
    }

    /// Ignore every version published under `group` (and descendants).
    pub fn add_blacklisted_group(&mut self, group: impl Into<String>) {
        self.by_group
            .entry(group.into())
            .or_default()
            .push(VersionMatcher::never());
    }

    /// Whether `version` of (group, artifact) is ignored.
    ///
    /// Scopes are consulted in order: global, group (longest matching key),
    /// then group+artifact; the first positive match wins.
    pub fn is_version_blacklisted(&self, group: &str, artifact: &str, version: &str) -> bool {
        if self.global.iter().any(|m| m.matches(version)) {
            return true;
        }
        if let Some(matchers) = self.group_matchers(group) {
            if matchers.iter().any(|m| m.matches(version)) {
                return true;
            }
        }
        if let Some(matchers) = self
            .by_artifact
            .get(group)
            .and_then(|artifacts| artifacts.get(artifact))
        {
            if matchers.iter().any(|m| m.matches(version)) {
                return true;
            }
        }
        false
    }

    /// Whether the coordinate's own version is ignored. A coordinate
    /// without a version is tested with the empty string, so only
    /// catch-all rules apply.
    pub fn is_artifact_blacklisted(&self, coord: &crate::coordinate::Coordinate) -> bool {
        self.is_version_blacklisted(
            &coord.group_id,
            &coord.artifact_id,
            coord.version.as_deref().unwrap_or(""),
        )
    }

    /// Whether every version of (group, artifact) is ignored: any scope
    /// holds a NEVER matcher under a matching key.
    pub fn is_all_versions_blacklisted(&self, group: &str, artifact: &str) -> bool {
        if self.global.iter().any(VersionMatcher::is_never) {
            return true;
        }
        let group_never = self
            .by_group
            .iter()
            .filter(|(key, _)| group_key_matches(key, group))
            .any(|(_, matchers)| matchers.iter().any(VersionMatcher::is_never));
        if group_never {
            return true;
        }
        self.by_artifact
            .get(group)
            .and_then(|artifacts| artifacts.get(artifact))
            .map(|matchers| matchers.iter().any(VersionMatcher::is_never))
            .unwrap_or(false)
    }

    /// The matchers of the longest group key covering `group`, if any.
    fn group_matchers(&self, group: &str) -> Option<&[VersionMatcher]> {
        self.by_group
            .iter()
            .filter(|(key, _)| group_key_matches(key, group))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, matchers)| matchers.as_slice())
    }

    pub fn global_matchers(&self) -> &[VersionMatcher] {
        &self.global
    }

    pub fn group_entries(&self) -> impl Iterator<Item = (&str, &[VersionMatcher])> {
        self.by_group
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn artifact_entries(&self) -> impl Iterator<Item = (&str, &str, &[VersionMatcher])> {
        self.by_artifact.iter().flat_map(|(group, artifacts)| {
            artifacts
                .iter()
                .map(move |(artifact, matchers)| {
                    (group.as_str(), artifact.as_str(), matchers.as_slice())
                })
        })
    }
}

/// Whether a group key covers a group: exact match or dotted descendant.
fn group_key_matches(key: &str, group: &str) -> bool {
    group == key || (group.len() > key.len() && group.starts_with(key) && group.as_bytes()[key.len()] == b'.')
}
