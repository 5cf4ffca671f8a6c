//! Query-side record retrieval with coalescing and bounded upstream
//! fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use relwatch_core::coordinate::Coordinate;
use relwatch_core::version::VersionInfo;
use relwatch_store::caching::CachingStore;
use relwatch_upstream::fetcher::MetadataFetcher;

use crate::locks::LockCache;

/// Decides whether a cached record must be refreshed for a coordinate.
pub type StalePredicate = Arc<dyn Fn(&Coordinate, &VersionInfo) -> bool + Send + Sync>;

/// Resolves coordinates to version records, going upstream for missing or
/// stale entries under bounded concurrency.
pub struct VersionTracker {
    cache: Arc<CachingStore>,
    fetcher: Arc<MetadataFetcher>,
    locks: Arc<LockCache>,
    limit: Arc<Semaphore>,
    errors: AtomicU64,
}

impl VersionTracker {
    pub fn new(
        cache: Arc<CachingStore>,
        fetcher: Arc<MetadataFetcher>,
        locks: Arc<LockCache>,
        pool_size: usize,
    ) -> Self {
        Self {
            cache,
            fetcher,
            locks,
            limit: Arc::new(Semaphore::new(pool_size.max(1))),
            errors: AtomicU64::new(0),
        }
    }

    /// Lookups that failed with an error since this tracker was built.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Resolve every coordinate to its record.
    ///
    /// Per coordinate, under its lock: a cached record that the predicate
    /// calls fresh is returned with its request stamp updated; a missing
    /// or stale one is refreshed upstream first. All work runs on one
    /// task set bounded by the tracker pool; the call returns when every
    /// spawned lookup has finished. A failing lookup is logged and
    /// counted, and simply leaves no entry in the result map.
    pub async fn get_version_info(
        &self,
        coords: &[Coordinate],
        stale: StalePredicate,
    ) -> HashMap<Coordinate, VersionInfo> {
        let mut join_set = JoinSet::new();
        let mut scheduled = HashSet::new();

        for coord in coords {
            if !scheduled.insert(coord.clone()) {
                continue;
            }
            let cache = Arc::clone(&self.cache);
            let fetcher = Arc::clone(&self.fetcher);
            let locks = Arc::clone(&self.locks);
            let limit = Arc::clone(&self.limit);
            let stale = Arc::clone(&stale);
            let coord = coord.clone();
            join_set.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let _guard = locks.lock(&coord.group_id, &coord.artifact_id).await;
                let result = resolve_one(&cache, &fetcher, &coord, stale.as_ref()).await;
                (coord, result)
            });
        }

        let mut resolved = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((coord, Ok(info))) => {
                    resolved.insert(coord, info);
                }
                Ok((coord, Err(error))) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%coord, %error, "version lookup failed");
                }
                Err(error) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(%error, "version lookup task died");
                }
            }
        }
        resolved
    }
}

/// One lookup, executed under the coordinate's lock.
async fn resolve_one(
    cache: &CachingStore,
    fetcher: &MetadataFetcher,
    coord: &Coordinate,
    stale: &(dyn Fn(&Coordinate, &VersionInfo) -> bool + Send + Sync),
) -> miette::Result<VersionInfo> {
    let now = Utc::now();
    let mut info = match cache.get(&coord.group_id, &coord.artifact_id)? {
        Some(info) if !stale(coord, &info) => {
            cache.update_last_request_date(&coord.group_id, &coord.artifact_id, now)?;
            return Ok(info);
        }
        Some(info) => info,
        None => VersionInfo::new(coord.clone(), now),
    };
    info.last_request_date = now;
    let result = fetcher.update(&mut info, coord, false).await;
    tracing::debug!(%coord, ?result, "upstream update finished");
    cache.put(info.clone())?;
    Ok(info)
}
