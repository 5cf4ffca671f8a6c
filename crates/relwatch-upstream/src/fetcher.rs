//! The upstream update protocol.
//!
//! One update pass fetches the index document, short-circuits when the
//! repository reports no changes, recovers the full version listing with
//! release dates from the search endpoint, and reconciles the result into
//! the cached record. Transient failures stamp the failure date and come
//! back as a non-throwing [`UpdateResult`] so the record stays persisted
//! and the background refresher can retry later.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;

use relwatch_core::blacklist::Blacklist;
use relwatch_core::coordinate::Coordinate;
use relwatch_core::version::{Version, VersionInfo};

use crate::client;
use crate::metadata::{self, IndexMetadata};
use crate::repository::UpstreamRepository;
use crate::search::VersionSearch;

/// Outcome of one upstream update pass for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The record was refreshed from the upstream listing.
    Updated,
    /// The repository's update stamp matched the record; nothing fetched.
    NoChangesOnServer,
    /// The index document does not exist (HTTP 404).
    ArtifactUnknown,
    /// The index exists but the requested version is not listed.
    ArtifactVersionNotFound,
    /// The coordinate is fully blacklisted; no upstream traffic.
    Blacklisted,
    /// The update failed; the failure date was stamped.
    Error,
}

/// Fetches upstream metadata and reconciles it into version records.
pub struct MetadataFetcher {
    client: Client,
    repo: UpstreamRepository,
    search: VersionSearch,
    blacklist: Arc<Blacklist>,
}

impl MetadataFetcher {
    pub fn new(
        client: Client,
        repo: UpstreamRepository,
        blacklist: Arc<Blacklist>,
        search_concurrency: usize,
    ) -> Self {
        let search = VersionSearch::new(client.clone(), repo.clone(), search_concurrency);
        Self {
            client,
            repo,
            search,
            blacklist,
        }
    }

    /// Run one update pass for `info`.
    ///
    /// `coord` is the request coordinate whose version decides
    /// [`UpdateResult::ArtifactVersionNotFound`]; `force` bypasses the
    /// no-changes short-circuit. Mutates the record's poll stamps in all
    /// outcomes.
    pub async fn update(
        &self,
        info: &mut VersionInfo,
        coord: &Coordinate,
        force: bool,
    ) -> UpdateResult {
        let now = Utc::now();
        let group = info.artifact.group_id.clone();
        let artifact = info.artifact.artifact_id.clone();

        if self.blacklist.is_all_versions_blacklisted(&group, &artifact) {
            info.last_success_date = Some(now);
            tracing::debug!(%group, %artifact, "skipping fully blacklisted coordinate");
            return UpdateResult::Blacklisted;
        }

        match self.try_update(info, coord, force, now).await {
            Ok(result) => result,
            Err(error) => {
                info.last_failure_date = Some(now);
                tracing::warn!(%group, %artifact, %error, "upstream update failed");
                UpdateResult::Error
            }
        }
    }

    async fn try_update(
        &self,
        info: &mut VersionInfo,
        coord: &Coordinate,
        force: bool,
        now: DateTime<Utc>,
    ) -> miette::Result<UpdateResult> {
        let group = info.artifact.group_id.clone();
        let artifact = info.artifact.artifact_id.clone();

        let url = self.repo.metadata_url(&group, &artifact);
        let Some(xml) = client::get_text(&self.client, &url).await? else {
            info.last_failure_date = Some(now);
            tracing::debug!(%group, %artifact, "index document not found");
            return Ok(UpdateResult::ArtifactUnknown);
        };

        let meta = metadata::parse_index_metadata(&xml)?;

        if !force
            && meta.last_updated.is_some()
            && meta.last_updated == info.last_repository_update
        {
            info.last_success_date = Some(now);
            return Ok(UpdateResult::NoChangesOnServer);
        }

        let fetched = self
            .search
            .fetch_all(&group, &artifact, coord.classifier.as_deref())
            .await?;

        reconcile_versions(info, &fetched, now);
        apply_latest_pointers(info, &meta, now);

        info.last_repository_update = meta.last_updated;
        info.last_success_date = Some(now);

        if !coord.version_is_blank() {
            let requested = coord.version.as_deref().unwrap_or_default();
            if !info.has_version(requested) {
                tracing::debug!(%group, %artifact, requested, "requested version not listed upstream");
                return Ok(UpdateResult::ArtifactVersionNotFound);
            }
        }

        Ok(UpdateResult::Updated)
    }
}

/// Reconcile the fetched listing into the record's version list: drop
/// entries no longer published, add newly seen ones (stamping
/// `first_seen_by_server`), and backfill missing release dates.
fn reconcile_versions(info: &mut VersionInfo, fetched: &[Version], now: DateTime<Utc>) {
    info.versions
        .retain(|existing| fetched.iter().any(|f| f.version_string == existing.version_string));

    for incoming in fetched {
        match info.get_version_mut(&incoming.version_string) {
            Some(existing) => {
                if existing.release_date.is_none() {
                    existing.release_date = incoming.release_date;
                }
            }
            None => {
                info.versions.push(Version {
                    version_string: incoming.version_string.clone(),
                    release_date: incoming.release_date,
                    first_seen_by_server: Some(now),
                });
            }
        }
    }
}

/// Point the latest release/snapshot names at the index's advertised
/// versions, creating placeholder entries when the index names a version
/// the search listing does not carry.
fn apply_latest_pointers(info: &mut VersionInfo, meta: &IndexMetadata, now: DateTime<Utc>) {
    for name in [&meta.latest, &meta.release].into_iter().flatten() {
        if !info.has_version(name) {
            info.versions.push(Version {
                version_string: name.clone(),
                release_date: None,
                first_seen_by_server: Some(now),
            });
        }
    }
    info.latest_snapshot_version = meta.latest.clone();
    info.latest_release_version = meta.release.clone();
}
