//! The relwatch engine.
//!
//! [`ReleaseTracker`] wires the full pipeline together: the durable file
//! store, the write-back cache, the upstream fetcher, the per-coordinate
//! lock cache, the version tracker, and the query engine. Server
//! deployments additionally start the background refresher. Construction
//! and all async entry points must run within a Tokio runtime.

pub mod locks;
pub mod query;
pub mod refresher;
pub mod tracker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relwatch_codec::wire::{self, QueryRequest, QueryResponse, Response};
use relwatch_core::blacklist::Blacklist;
use relwatch_core::config::TrackerConfig;
use relwatch_store::caching::CachingStore;
use relwatch_store::file::FileStore;
use relwatch_store::stats::StoreStatistics;
use relwatch_upstream::client;
use relwatch_upstream::fetcher::MetadataFetcher;
use relwatch_upstream::repository::UpstreamRepository;

use crate::locks::LockCache;
use crate::query::QueryEngine;
use crate::refresher::{BackgroundRefresher, RefreshSettings};
use crate::tracker::VersionTracker;

/// The assembled release-metadata tracking service.
pub struct ReleaseTracker {
    cache: Arc<CachingStore>,
    engine: QueryEngine,
    refresher: Arc<BackgroundRefresher>,
    closed: AtomicBool,
}

impl ReleaseTracker {
    /// Assemble the pipeline from configuration, opening (and migrating,
    /// if needed) the store file.
    pub fn new(config: TrackerConfig) -> miette::Result<Self> {
        let store = Arc::new(FileStore::open(&config.store_path)?);
        let cache = Arc::new(CachingStore::new(store, config.flush_interval));
        cache.start_flusher();

        let mut server_blacklist = Blacklist::new();
        for group in &config.blacklisted_group_ids {
            server_blacklist.add_blacklisted_group(group);
        }
        let server_blacklist = Arc::new(server_blacklist);

        let http = client::build_client()?;
        let repo = UpstreamRepository::new(&config.index_url, &config.search_url);
        let fetcher = Arc::new(MetadataFetcher::new(
            http,
            repo,
            Arc::clone(&server_blacklist),
            config.search_pool_size,
        ));
        let locks = Arc::new(LockCache::new());

        let tracker = Arc::new(VersionTracker::new(
            Arc::clone(&cache),
            Arc::clone(&fetcher),
            Arc::clone(&locks),
            config.tracker_pool_size,
        ));
        let engine = QueryEngine::new(
            tracker,
            server_blacklist,
            config.update_delay_after_success,
            config.update_delay_after_failure,
        );
        let refresher = Arc::new(BackgroundRefresher::new(
            Arc::clone(&cache),
            fetcher,
            locks,
            RefreshSettings {
                check_interval: config.bg_update_check_interval,
                delay_after_success: config.update_delay_after_success,
                delay_after_failure: config.update_delay_after_failure,
                pool_size: config.refresher_pool_size,
            },
        ));

        Ok(Self {
            cache,
            engine,
            refresher,
            closed: AtomicBool::new(false),
        })
    }

    /// Start the background refresher (server mode).
    pub fn start_refresher(&self) {
        self.refresher.start();
    }

    /// Answer a query. This is the only query path; wire handlers call
    /// it through [`handle_frame`](Self::handle_frame).
    pub async fn process_query(&self, request: &QueryRequest) -> QueryResponse {
        self.engine.process_query(request).await
    }

    /// Decode a wire frame, answer it, and encode the response in the
    /// encoding the request arrived in.
    pub async fn handle_frame(&self, frame: &[u8]) -> miette::Result<Vec<u8>> {
        let (request, encoding) = wire::decode_request(frame)?;
        let body = self.process_query(&request.body).await;
        let response = Response::query(body);
        Ok(wire::encode_response(&response, encoding)?)
    }

    /// Store activity counters.
    pub fn statistics(&self) -> StoreStatistics {
        self.cache.store().statistics()
    }

    /// The background refresher, for driving sweeps directly.
    pub fn refresher(&self) -> &BackgroundRefresher {
        &self.refresher
    }

    /// Stop the refresher, flush the cache, and shut down. Idempotent;
    /// in-flight queries are not canceled.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.refresher.stop().await;
        self.cache.close().await;
    }
}
