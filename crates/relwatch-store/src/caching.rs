//! In-memory write-back cache over the file store.
//!
//! All records live in two maps: `clean` mirrors what was last persisted,
//! `dirty` holds pending writes. Reads prefer `dirty` and always return
//! clones; the live entries never escape. A background flusher persists
//! the dirty set periodically and a supervisor respawns it should it ever
//! die outside of shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use relwatch_core::index::ArtifactIndex;
use relwatch_core::version::VersionInfo;
use relwatch_util::errors::RelwatchError;

use crate::file::FileStore;

/// Delay before respawning a flusher that died unexpectedly.
const FLUSHER_RESTART_DELAY: Duration = Duration::from_secs(60);

#[derive(Default)]
struct CacheState {
    clean: ArtifactIndex<VersionInfo>,
    dirty: ArtifactIndex<VersionInfo>,
    initialized: bool,
}

/// Write-back caching store decorating a [`FileStore`].
pub struct CachingStore {
    store: Arc<FileStore>,
    state: Mutex<CacheState>,
    flush_interval: Duration,
    terminate: Arc<AtomicBool>,
    notify: Arc<Notify>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl CachingStore {
    pub fn new(store: Arc<FileStore>, flush_interval: Duration) -> Self {
        Self {
            store,
            state: Mutex::new(CacheState::default()),
            flush_interval,
            terminate: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            supervisor: Mutex::new(None),
        }
    }

    /// The decorated file store.
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Spawn the background flusher and its supervisor. Must be called
    /// within a Tokio runtime.
    pub fn start_flusher(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move { cache.supervise().await });
        *lock(&self.supervisor) = Some(handle);
    }

    /// The cached record for a coordinate, as a clone.
    pub fn get(&self, group: &str, artifact: &str) -> miette::Result<Option<VersionInfo>> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        self.ensure_initialized(&mut state)?;
        Ok(state
            .dirty
            .get(group, artifact)
            .or_else(|| state.clean.get(group, artifact))
            .cloned())
    }

    /// Insert or update a record; it becomes durable at the next flush.
    pub fn put(&self, info: VersionInfo) -> miette::Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        self.ensure_initialized(&mut state)?;
        let group = info.artifact.group_id.clone();
        let artifact = info.artifact.artifact_id.clone();
        state.dirty.put(group, artifact, info);
        Ok(())
    }

    /// Every record in the merged view, dirty entries overriding clean.
    pub fn get_all(&self) -> miette::Result<Vec<VersionInfo>> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        self.ensure_initialized(&mut state)?;
        let mut merged: Vec<VersionInfo> = Vec::with_capacity(state.clean.len());
        for (group, artifact, info) in state.clean.iter() {
            if !state.dirty.contains(group, artifact) {
                merged.push(info.clone());
            }
        }
        merged.extend(state.dirty.values().cloned());
        Ok(merged)
    }

    /// Stamp the last request date on a cached record, marking it dirty.
    pub fn update_last_request_date(
        &self,
        group: &str,
        artifact: &str,
        now: DateTime<Utc>,
    ) -> miette::Result<()> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        self.ensure_initialized(&mut state)?;
        let existing = state
            .dirty
            .get(group, artifact)
            .or_else(|| state.clean.get(group, artifact))
            .cloned();
        if let Some(mut info) = existing {
            info.last_request_date = now;
            state.dirty.put(group.to_string(), artifact.to_string(), info);
        }
        Ok(())
    }

    /// Persist all dirty entries and move them into the clean map.
    ///
    /// On a write failure the dirty set is left untouched so the entries
    /// are retried at the next flush.
    pub fn flush(&self) -> miette::Result<()> {
        let mut state = lock(&self.state);
        if state.dirty.is_empty() {
            return Ok(());
        }
        let records: Vec<VersionInfo> = state.dirty.values().cloned().collect();
        self.store.save_or_update(&records)?;
        for (group, artifact, info) in state.dirty.drain_entries() {
            state.clean.put(group, artifact, info);
        }
        Ok(())
    }

    /// Final flush, then stop the flusher and await its termination.
    /// Idempotent.
    pub async fn close(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        self.notify.notify_one();
        if let Err(error) = self.flush() {
            tracing::warn!(%error, "final cache flush failed");
        }
        let handle = lock(&self.supervisor).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Reject record operations once shutdown has begun. The final flush
    /// in [`close`](Self::close) is exempt so pending writes still land.
    fn ensure_open(&self) -> miette::Result<()> {
        if self.terminate.load(Ordering::SeqCst) {
            return Err(RelwatchError::Interrupted.into());
        }
        Ok(())
    }

    fn ensure_initialized(&self, state: &mut MutexGuard<'_, CacheState>) -> miette::Result<()> {
        if state.initialized {
            return Ok(());
        }
        for info in self.store.load_all()? {
            let group = info.artifact.group_id.clone();
            let artifact = info.artifact.artifact_id.clone();
            state.clean.put(group, artifact, info);
        }
        state.initialized = true;
        Ok(())
    }

    async fn supervise(self: Arc<Self>) {
        loop {
            let cache = Arc::clone(&self);
            let worker = tokio::spawn(async move { cache.flush_loop().await });
            match worker.await {
                Ok(()) => break,
                Err(error) => {
                    if self.terminate.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::error!(
                        %error,
                        "cache flusher died unexpectedly, restarting in {}s",
                        FLUSHER_RESTART_DELAY.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(FLUSHER_RESTART_DELAY) => {}
                        _ = self.notify.notified() => {}
                    }
                    if self.terminate.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }
    }

    async fn flush_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.flush_interval) => {}
                _ = self.notify.notified() => {}
            }
            if self.terminate.load(Ordering::SeqCst) {
                return;
            }
            if let Err(error) = self.flush() {
                tracing::warn!(%error, "periodic cache flush failed");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
