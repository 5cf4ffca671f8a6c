//! maven-metadata.xml parsing for version discovery.
//!
//! The parser is a plain event loop over the document; quick-xml resolves
//! no external entities, so hostile documents cannot reach out of process.

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use relwatch_util::errors::RelwatchError;

/// Artifact-level index metadata: the advertised latest/release versions,
/// the full version listing, and the repository's own update stamp.
#[derive(Debug, Clone, Default)]
pub struct IndexMetadata {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub latest: Option<String>,
    pub release: Option<String>,
    pub versions: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Parse an artifact-level `maven-metadata.xml`.
pub fn parse_index_metadata(xml: &str) -> miette::Result<IndexMetadata> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut meta = IndexMetadata::default();
    let mut path: Vec<String> = Vec::new();
    let mut text_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
                text_buf.clear();
            }
            Ok(Event::Text(ref e)) => {
                text_buf = e.unescape().unwrap_or_default().to_string();
            }
            Ok(Event::End(_)) => {
                let ctx = path.join(">");

                match ctx.as_str() {
                    "metadata>groupId" => meta.group_id = Some(text_buf.clone()),
                    "metadata>artifactId" => meta.artifact_id = Some(text_buf.clone()),
                    "metadata>versioning>latest" => meta.latest = Some(text_buf.clone()),
                    "metadata>versioning>release" => meta.release = Some(text_buf.clone()),
                    "metadata>versioning>versions>version" => {
                        meta.versions.push(text_buf.clone());
                    }
                    "metadata>versioning>lastUpdated" => {
                        meta.last_updated = Some(parse_last_updated(&text_buf)?);
                    }
                    _ => {}
                }

                path.pop();
                text_buf.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RelwatchError::Upstream {
                    message: format!("failed to parse maven-metadata.xml: {e}"),
                }
                .into());
            }
            _ => {}
        }
    }

    Ok(meta)
}

/// Parse the index `lastUpdated` stamp (`yyyyMMddHHmmss`, UTC).
pub fn parse_last_updated(text: &str) -> Result<DateTime<Utc>, RelwatchError> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| RelwatchError::Upstream {
            message: format!("invalid lastUpdated stamp {text:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_full_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.apache.commons</groupId>
  <artifactId>commons-lang3</artifactId>
  <versioning>
    <latest>3.12.0</latest>
    <release>3.12.0</release>
    <versions>
      <version>3.11</version>
      <version>3.12.0</version>
    </versions>
    <lastUpdated>20210301214036</lastUpdated>
  </versioning>
</metadata>"#;
        let meta = parse_index_metadata(xml).unwrap();
        assert_eq!(meta.group_id.as_deref(), Some("org.apache.commons"));
        assert_eq!(meta.artifact_id.as_deref(), Some("commons-lang3"));
        assert_eq!(meta.latest.as_deref(), Some("3.12.0"));
        assert_eq!(meta.release.as_deref(), Some("3.12.0"));
        assert_eq!(meta.versions, ["3.11", "3.12.0"]);
        assert_eq!(
            meta.last_updated,
            Some(Utc.with_ymd_and_hms(2021, 3, 1, 21, 40, 36).unwrap())
        );
    }

    #[test]
    fn missing_sections_stay_empty() {
        let xml = r#"<metadata>
  <groupId>com.example</groupId>
  <artifactId>lib</artifactId>
</metadata>"#;
        let meta = parse_index_metadata(xml).unwrap();
        assert!(meta.latest.is_none());
        assert!(meta.release.is_none());
        assert!(meta.versions.is_empty());
        assert!(meta.last_updated.is_none());
    }

    #[test]
    fn bad_last_updated_is_an_error() {
        let xml = r#"<metadata>
  <versioning><lastUpdated>not-a-date</lastUpdated></versioning>
</metadata>"#;
        assert!(parse_index_metadata(xml).is_err());
    }

    #[test]
    fn external_entities_are_inert() {
        // A document trying to pull in an external entity parses without
        // any resolution; the entity reference simply never expands into
        // file contents.
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE metadata [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<metadata>
  <groupId>&xxe;</groupId>
</metadata>"#;
        let meta = parse_index_metadata(xml).unwrap_or_default();
        assert_ne!(meta.group_id.as_deref(), Some("root"));
        if let Some(group) = meta.group_id {
            assert!(!group.contains("root:"));
        }
    }

    #[test]
    fn malformed_xml_is_an_upstream_error() {
        assert!(parse_index_metadata("<metadata><unclosed>").is_err());
    }
}
