//! Paged version search against the REST endpoint.
//!
//! A single response is capped by the server, so the full listing is
//! recovered by advancing `start` by each returned batch size until the
//! accumulated count reaches `numFound`. Pages after the first are
//! fetched concurrently under a bounded limit.

use std::sync::Arc;

use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use relwatch_core::version::Version;
use relwatch_util::errors::RelwatchError;

use crate::client;
use crate::repository::UpstreamRepository;

/// Rows requested per page.
pub const DEFAULT_PAGE_ROWS: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchBody,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(rename = "numFound")]
    num_found: usize,
    #[serde(default)]
    docs: Vec<VersionDoc>,
}

#[derive(Debug, Deserialize)]
struct VersionDoc {
    #[serde(rename = "v")]
    version: String,
    /// Release instant in epoch milliseconds.
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Client for the paged version listing of the search REST endpoint.
#[derive(Clone)]
pub struct VersionSearch {
    client: Client,
    repo: UpstreamRepository,
    rows: usize,
    page_limit: Arc<Semaphore>,
}

impl VersionSearch {
    pub fn new(client: Client, repo: UpstreamRepository, concurrency: usize) -> Self {
        Self {
            client,
            repo,
            rows: DEFAULT_PAGE_ROWS,
            page_limit: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    #[cfg(test)]
    fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Fetch the complete version listing for an artifact.
    ///
    /// Fails with an upstream error when the accumulated count does not
    /// match the advertised `numFound`.
    pub async fn fetch_all(
        &self,
        group: &str,
        artifact: &str,
        classifier: Option<&str>,
    ) -> miette::Result<Vec<Version>> {
        let first = self.fetch_page(group, artifact, classifier, 0).await?;
        let num_found = first.num_found;
        let batch = first.docs.len();

        let mut docs = first.docs;
        if batch < num_found {
            if batch == 0 {
                return Err(RelwatchError::Upstream {
                    message: format!(
                        "search for {group}:{artifact} advertised {num_found} versions but returned an empty page"
                    ),
                }
                .into());
            }

            let mut join_set = JoinSet::new();
            let mut start = batch;
            while start < num_found {
                let search = self.clone();
                let group = group.to_string();
                let artifact = artifact.to_string();
                let classifier = classifier.map(str::to_string);
                join_set.spawn(async move {
                    let _permit = search.page_limit.acquire().await;
                    let page = search
                        .fetch_page(&group, &artifact, classifier.as_deref(), start)
                        .await;
                    (start, page)
                });
                start += batch;
            }

            let mut pages: Vec<(usize, SearchBody)> = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                let (start, page) = joined.map_err(|e| RelwatchError::Generic {
                    message: format!("search page task failed: {e}"),
                })?;
                pages.push((start, page?));
            }
            // keep the upstream listing order stable across pages
            pages.sort_by_key(|(start, _)| *start);
            for (_, page) in pages {
                docs.extend(page.docs);
            }
        }

        if docs.len() != num_found {
            return Err(RelwatchError::Upstream {
                message: format!(
                    "search paging mismatch for {group}:{artifact}: got {} of {num_found} versions",
                    docs.len()
                ),
            }
            .into());
        }

        Ok(docs
            .into_iter()
            .map(|doc| Version {
                version_string: doc.version,
                release_date: doc.timestamp.and_then(DateTime::from_timestamp_millis),
                first_seen_by_server: None,
            })
            .collect())
    }

    async fn fetch_page(
        &self,
        group: &str,
        artifact: &str,
        classifier: Option<&str>,
        start: usize,
    ) -> miette::Result<SearchBody> {
        let url = self
            .repo
            .search_page_url(group, artifact, classifier, start, self.rows);
        let body = client::get_text(&self.client, &url)
            .await?
            .ok_or_else(|| RelwatchError::Upstream {
                message: format!("search endpoint returned 404 for {url}"),
            })?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| RelwatchError::Upstream {
                message: format!("invalid search response from {url}: {e}"),
            })?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn search_for(server: &Server, concurrency: usize) -> VersionSearch {
        let repo = UpstreamRepository::new(server.url(), server.url());
        VersionSearch::new(Client::new(), repo, concurrency)
    }

    #[tokio::test]
    async fn single_page_listing() {
        let mut server = Server::new_async().await;
        let body = r#"{"response": {"numFound": 2, "docs": [
            {"v": "3.11", "timestamp": 1626001920000},
            {"v": "3.12.0", "timestamp": 1626091980000}
        ]}}"#;
        let _m = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Regex("start=0".to_string()))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let versions = search_for(&server, 4)
            .fetch_all("org.apache.commons", "commons-lang3", None)
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_string, "3.11");
        assert_eq!(
            versions[0].release_date.unwrap().timestamp_millis(),
            1626001920000
        );
    }

    #[tokio::test]
    async fn paged_listing_accumulates_all_pages() {
        let mut server = Server::new_async().await;
        let search = search_for(&server, 2).with_rows(2);

        let _p0 = page_mock(&mut server, 0, &["1.0", "1.1"], 5).await;
        let _p2 = page_mock(&mut server, 2, &["1.2", "1.3"], 5).await;
        let _p4 = page_mock(&mut server, 4, &["1.4"], 5).await;

        let versions = search.fetch_all("com.example", "lib", None).await.unwrap();
        let names: Vec<&str> = versions.iter().map(|v| v.version_string.as_str()).collect();
        assert_eq!(names, ["1.0", "1.1", "1.2", "1.3", "1.4"]);
    }

    async fn page_mock(
        server: &mut Server,
        start: usize,
        versions: &[&str],
        num_found: usize,
    ) -> mockito::Mock {
        let docs: Vec<String> = versions
            .iter()
            .map(|v| format!(r#"{{"v": "{v}", "timestamp": 1000}}"#))
            .collect();
        let body = format!(
            r#"{{"response": {{"numFound": {num_found}, "docs": [{}]}}}}"#,
            docs.join(",")
        );
        server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Regex(format!("start={start}&")))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn paging_mismatch_is_an_error() {
        let mut server = Server::new_async().await;
        let search = search_for(&server, 2).with_rows(2);

        // two pages of two versions each while only three are advertised
        let _p0 = page_mock(&mut server, 0, &["1.0", "1.1"], 3).await;
        let _p2 = page_mock(&mut server, 2, &["1.2", "1.3"], 3).await;

        let err = search
            .fetch_all("com.example", "lib", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("paging mismatch"));
    }

    #[tokio::test]
    async fn missing_timestamp_means_no_release_date() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(r#"{"response": {"numFound": 1, "docs": [{"v": "1.0"}]}}"#)
            .create_async()
            .await;

        let versions = search_for(&server, 1)
            .fetch_all("com.example", "lib", None)
            .await
            .unwrap();
        assert!(versions[0].release_date.is_none());
    }

    #[tokio::test]
    async fn advertised_but_empty_listing_is_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(r#"{"response": {"numFound": 7, "docs": []}}"#)
            .create_async()
            .await;

        assert!(search_for(&server, 1)
            .fetch_all("com.example", "lib", None)
            .await
            .is_err());
    }
}
