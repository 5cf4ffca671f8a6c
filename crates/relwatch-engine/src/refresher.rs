//! Background refresh of stale records.
//!
//! A single long-lived driver task sweeps the full record set, refreshes
//! the stale entries on a bounded task set, then sleeps the check
//! interval. The sleep is interruptible so shutdown is prompt. A
//! watchdog respawns the driver a minute after an unexpected death
//! instead of letting the process lose its refresh loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use relwatch_core::stale;
use relwatch_store::caching::CachingStore;
use relwatch_upstream::fetcher::MetadataFetcher;

use crate::locks::LockCache;

/// Delay before respawning a driver that died unexpectedly.
const RESTART_DELAY: Duration = Duration::from_secs(60);

/// Tunables for the background sweep.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Sleep between sweeps.
    pub check_interval: Duration,
    /// Staleness threshold after a successful poll.
    pub delay_after_success: Duration,
    /// Staleness threshold after a failed poll.
    pub delay_after_failure: Duration,
    /// Concurrent refreshes per sweep.
    pub pool_size: usize,
}

/// Periodically re-fetches stale records (server mode only).
pub struct BackgroundRefresher {
    cache: Arc<CachingStore>,
    fetcher: Arc<MetadataFetcher>,
    locks: Arc<LockCache>,
    settings: RefreshSettings,
    terminate: Arc<AtomicBool>,
    notify: Arc<Notify>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundRefresher {
    pub fn new(
        cache: Arc<CachingStore>,
        fetcher: Arc<MetadataFetcher>,
        locks: Arc<LockCache>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            cache,
            fetcher,
            locks,
            settings,
            terminate: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            supervisor: Mutex::new(None),
        }
    }

    /// Spawn the driver and its watchdog. Must be called within a Tokio
    /// runtime; starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut supervisor = lock(&self.supervisor);
        if supervisor.is_some() {
            return;
        }
        let refresher = Arc::clone(self);
        *supervisor = Some(tokio::spawn(async move { refresher.supervise().await }));
    }

    /// Signal termination, wake the sleeper, and await the driver.
    /// Idempotent.
    pub async fn stop(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
        let handle = lock(&self.supervisor).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One sweep: refresh every stale record. Returns how many records
    /// were refreshed.
    pub async fn sweep_once(&self) -> miette::Result<usize> {
        let now = Utc::now();
        let records = self.cache.get_all()?;
        let stale: Vec<_> = records
            .into_iter()
            .filter(|record| {
                stale::is_stale(
                    record,
                    self.settings.delay_after_success,
                    self.settings.delay_after_failure,
                    now,
                )
            })
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = stale.len(), "refreshing stale records");

        let limit = Arc::new(Semaphore::new(self.settings.pool_size.max(1)));
        let mut join_set = JoinSet::new();
        for record in stale {
            let cache = Arc::clone(&self.cache);
            let fetcher = Arc::clone(&self.fetcher);
            let locks = Arc::clone(&self.locks);
            let limit = Arc::clone(&limit);
            let settings = self.settings.clone();
            join_set.spawn(async move {
                let _permit = limit.acquire_owned().await;
                let group = record.artifact.group_id.clone();
                let artifact = record.artifact.artifact_id.clone();
                let _guard = locks.lock(&group, &artifact).await;
                refresh_one(&cache, &fetcher, &settings, &group, &artifact).await
            });
        }

        let mut refreshed = 0;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(error) => tracing::error!(%error, "refresh task died"),
            }
        }
        Ok(refreshed)
    }

    async fn supervise(self: Arc<Self>) {
        loop {
            let refresher = Arc::clone(&self);
            let driver = tokio::spawn(async move { refresher.run_loop().await });
            match driver.await {
                Ok(()) => break,
                Err(error) => {
                    if self.terminate.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::error!(
                        %error,
                        "background refresher died unexpectedly, restarting in {}s",
                        RESTART_DELAY.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                        _ = self.notify.notified() => {}
                    }
                    if self.terminate.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                return;
            }
            match self.sweep_once().await {
                Ok(refreshed) if refreshed > 0 => {
                    tracing::info!(refreshed, "background refresh sweep finished");
                }
                Ok(_) => {}
                // transient: keep the loop alive and try again next sweep
                Err(error) => tracing::warn!(%error, "background refresh sweep failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.check_interval) => {}
                _ = self.notify.notified() => {}
            }
        }
    }
}

/// Refresh one record under its coordinate lock. Re-reads the cache
/// first: a foreground query may have refreshed the record while this
/// task waited on the lock.
async fn refresh_one(
    cache: &CachingStore,
    fetcher: &MetadataFetcher,
    settings: &RefreshSettings,
    group: &str,
    artifact: &str,
) -> bool {
    let current = match cache.get(group, artifact) {
        Ok(Some(info)) => info,
        Ok(None) => return false,
        Err(error) => {
            tracing::warn!(%group, %artifact, %error, "cache read failed during refresh");
            return false;
        }
    };
    if !stale::is_stale(
        &current,
        settings.delay_after_success,
        settings.delay_after_failure,
        Utc::now(),
    ) {
        return false;
    }

    let mut info = current;
    let coord = info.artifact.clone();
    let result = fetcher.update(&mut info, &coord, false).await;
    tracing::debug!(%group, %artifact, ?result, "background refresh finished");
    if let Err(error) = cache.put(info) {
        tracing::warn!(%group, %artifact, %error, "cache write failed during refresh");
        return false;
    }
    true
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
