use serde::{Deserialize, Serialize};

/// Default artifact packaging when none is given.
pub const DEFAULT_KIND: &str = "jar";

/// Maven coordinates identifying an artifact, optionally pinned to a version.
///
/// Equality and hashing use all five fields; use
/// [`matches_excluding_version`](Coordinate::matches_excluding_version) to
/// compare two coordinates regardless of their versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub group_id: String,
    pub artifact_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default = "default_kind", rename = "type")]
    pub kind: String,
}

fn default_kind() -> String {
    DEFAULT_KIND.to_string()
}

impl Coordinate {
    /// A version-less coordinate for a (group, artifact) pair.
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: None,
            classifier: None,
            kind: default_kind(),
        }
    }

    /// A coordinate pinned to a version.
    pub fn with_version(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            version: Some(version.into()),
            ..Self::new(group_id, artifact_id)
        }
    }

    /// Parse `"group:artifact:version"` shorthand.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [group, artifact] => Some(Self::new(*group, *artifact)),
            [group, artifact, version] => Some(Self::with_version(*group, *artifact, *version)),
            _ => None,
        }
    }

    /// This coordinate with the version cleared.
    pub fn without_version(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }

    /// Compare all fields except the version.
    pub fn matches_excluding_version(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.artifact_id == other.artifact_id
            && self.classifier == other.classifier
            && self.kind == other.kind
    }

    /// The `group:artifact` key used by the lock cache and the index.
    pub fn key(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }

    /// Whether the pinned version is a snapshot. A coordinate without a
    /// version counts as a release query.
    pub fn is_snapshot(&self) -> bool {
        self.version
            .as_deref()
            .is_some_and(is_snapshot_version)
    }

    /// The complement of [`is_snapshot`](Coordinate::is_snapshot).
    pub fn is_release(&self) -> bool {
        !self.is_snapshot()
    }

    /// Whether the version field is absent or blank.
    pub fn version_is_blank(&self) -> bool {
        self.version.as_deref().map_or(true, |v| v.trim().is_empty())
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}:{}", self.group_id, self.artifact_id, v),
            None => write!(f, "{}:{}", self.group_id, self.artifact_id),
        }
    }
}

/// Whether a version string denotes a snapshot.
///
/// A version whose final dot-separated component carries a `-qualifier`
/// suffix (`1.0-SNAPSHOT`, `2.1.0-rc1`) is a snapshot; everything else is a
/// release.
pub fn is_snapshot_version(version: &str) -> bool {
    let last = version.rsplit('.').next().unwrap_or(version);
    match last.split_once('-') {
        Some((_, qualifier)) => !qualifier.is_empty(),
        None => false,
    }
}

/// Whether a version string denotes a release.
pub fn is_release_version(version: &str) -> bool {
    !is_snapshot_version(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_version() {
        let coord = Coordinate::parse("org.apache.commons:commons-lang3:3.11").unwrap();
        assert_eq!(coord.group_id, "org.apache.commons");
        assert_eq!(coord.artifact_id, "commons-lang3");
        assert_eq!(coord.version.as_deref(), Some("3.11"));
        assert_eq!(coord.kind, "jar");
    }

    #[test]
    fn parse_without_version() {
        let coord = Coordinate::parse("com.example:lib").unwrap();
        assert!(coord.version.is_none());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Coordinate::parse("").is_none());
        assert!(Coordinate::parse("only-one-part").is_none());
        assert!(Coordinate::parse("a:b:c:d:e:f").is_none());
    }

    #[test]
    fn matches_excluding_version_ignores_version_only() {
        let a = Coordinate::with_version("com.example", "lib", "1.0");
        let b = Coordinate::with_version("com.example", "lib", "2.0");
        assert!(a.matches_excluding_version(&b));

        let mut c = b.clone();
        c.classifier = Some("sources".to_string());
        assert!(!a.matches_excluding_version(&c));
    }

    #[test]
    fn snapshot_detection() {
        assert!(is_snapshot_version("1.0-SNAPSHOT"));
        assert!(is_snapshot_version("2.1.0-rc1"));
        assert!(!is_snapshot_version("3.12.0"));
        assert!(!is_snapshot_version("1.0"));
    }

    #[test]
    fn coordinate_without_version_is_release() {
        let coord = Coordinate::new("com.example", "lib");
        assert!(coord.is_release());
        assert!(!coord.is_snapshot());
    }

    #[test]
    fn blank_version() {
        let mut coord = Coordinate::new("com.example", "lib");
        assert!(coord.version_is_blank());
        coord.version = Some("  ".to_string());
        assert!(coord.version_is_blank());
        coord.version = Some("1.0".to_string());
        assert!(!coord.version_is_blank());
    }

    #[test]
    fn display_roundtrip() {
        let coord = Coordinate::with_version("com.example", "lib", "1.0");
        assert_eq!(coord.to_string(), "com.example:lib:1.0");
        assert_eq!(Coordinate::parse(&coord.to_string()).unwrap(), coord);
    }
}
