//! Upstream endpoint layout: index documents and the search REST API.

/// Maven Central index base URL.
pub const MAVEN_CENTRAL_INDEX_URL: &str = "https://repo.maven.apache.org/maven2";

/// Maven Central search REST endpoint.
pub const MAVEN_CENTRAL_SEARCH_URL: &str = "https://search.maven.org/solrsearch/select";

/// A configured upstream: the index base serving `maven-metadata.xml`
/// documents and the paged search endpoint serving release timestamps.
#[derive(Debug, Clone)]
pub struct UpstreamRepository {
    pub index_url: String,
    pub search_url: String,
}

impl UpstreamRepository {
    pub fn new(index_url: impl Into<String>, search_url: impl Into<String>) -> Self {
        Self {
            index_url: index_url.into().trim_end_matches('/').to_string(),
            search_url: search_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// The default Maven Central pair.
    pub fn maven_central() -> Self {
        Self::new(MAVEN_CENTRAL_INDEX_URL, MAVEN_CENTRAL_SEARCH_URL)
    }

    /// URL of the artifact-level `maven-metadata.xml`.
    ///
    /// `org.apache.commons` / `commons-lang3` becomes
    /// `<base>/org/apache/commons/commons-lang3/maven-metadata.xml`.
    pub fn metadata_url(&self, group: &str, artifact: &str) -> String {
        format!(
            "{}/{}/{}/maven-metadata.xml",
            self.index_url,
            group.replace('.', "/"),
            artifact
        )
    }

    /// URL of one search page for the full version listing of an artifact.
    pub fn search_page_url(
        &self,
        group: &str,
        artifact: &str,
        classifier: Option<&str>,
        start: usize,
        rows: usize,
    ) -> String {
        let mut query = format!("g:{group}+AND+a:{artifact}");
        if let Some(classifier) = classifier {
            query.push_str("+AND+l:");
            query.push_str(classifier);
        }
        format!(
            "{}?q={query}&core=gav&start={start}&rows={rows}&wt=json",
            self.search_url
        )
    }
}
