use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::cache::persist::{CacheDocument, load_document, write_atomic};
use crate::cache::subscription::{
    CacheSubscription, CacheUpdate, SubscriberRegistry, SubscriptionId,
};
use crate::models::{CacheEntry, CacheStats, CoreError, PackageRecord, PackageSource};

/// `source:lowercased-query`, the only addressing scheme for cached searches.
pub fn cache_key(source: PackageSource, query: &str) -> String {
    format!("{}:{}", source.as_str(), query.to_lowercase())
}

#[derive(Default)]
struct CacheState {
    entries: CacheDocument,
    generation: u64,
}

struct WriterShared {
    wake: Notify,
    attempted: watch::Sender<u64>,
    // Every rewrite goes through the same temp file.
    write_lock: Mutex<()>,
}

impl WriterShared {
    /// Writes the snapshot for `generation` unless a newer one already got
    /// there first. `None` means the write was skipped.
    fn persist(&self, path: &Path, generation: u64, bytes: &[u8]) -> Option<Result<(), CoreError>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if generation <= *self.attempted.borrow() {
            return None;
        }
        let result = write_atomic(path, bytes);
        self.attempted.send_replace(generation);
        Some(result)
    }
}

/// Durable, query-keyed cache of search results.
///
/// Entries never expire under the default policy. Every mutation schedules a
/// rewrite of the whole document on a background writer; bursts of writes are
/// coalesced into one rewrite of the latest state. Overwriting an existing key
/// notifies that key's subscribers.
pub struct PackageCache {
    path: PathBuf,
    state: Arc<Mutex<CacheState>>,
    subscribers: SubscriberRegistry,
    max_age: Option<Duration>,
    writer: Arc<WriterShared>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl PackageCache {
    /// Loads the document at `path`. Read or parse failures are logged and the
    /// cache starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_document(&path) {
            Ok(entries) => {
                tracing::debug!(path = %path.display(), entries = entries.len(), "package cache loaded");
                entries
            }
            Err(error) => {
                tracing::error!(
                    path = %path.display(),
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to load package cache, starting empty"
                );
                CacheDocument::new()
            }
        };

        let (attempted, _) = watch::channel(0);
        Self {
            path,
            state: Arc::new(Mutex::new(CacheState {
                entries,
                generation: 0,
            })),
            subscribers: SubscriberRegistry::default(),
            max_age: None,
            writer: Arc::new(WriterShared {
                wake: Notify::new(),
                attempted,
                write_lock: Mutex::new(()),
            }),
            writer_task: Mutex::new(None),
        }
    }

    /// Bounds entry age. `None`, the default, keeps entries forever.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns an independent copy of the cached records for `key`.
    pub fn get(&self, key: &str) -> Option<Vec<PackageRecord>> {
        let mut state = self.lock_state();
        let expired = state
            .entries
            .get(key)
            .map(|entry| self.is_expired(entry))?;

        if expired {
            state.entries.remove(key);
            state.generation += 1;
            drop(state);
            tracing::debug!(key, "cache entry expired");
            self.schedule_save();
            return None;
        }

        tracing::debug!(key, "cache hit");
        state.entries.get(key).map(|entry| entry.data.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        let mut state = self.lock_state();
        let Some(expired) = state.entries.get(key).map(|entry| self.is_expired(entry)) else {
            return false;
        };

        if expired {
            state.entries.remove(key);
            state.generation += 1;
            drop(state);
            self.schedule_save();
            return false;
        }
        true
    }

    /// Last write wins. Only an overwrite notifies subscribers; the first
    /// insert for a key does not.
    pub fn set(&self, key: &str, data: Vec<PackageRecord>, query: &str) {
        let record_count = data.len();
        let shared = Arc::new(data);

        let is_update = {
            let mut state = self.lock_state();
            let previous = state.entries.insert(
                key.to_string(),
                CacheEntry {
                    data: shared.as_ref().clone(),
                    timestamp: now_millis(),
                    query: query.to_string(),
                },
            );
            state.generation += 1;
            previous.is_some()
        };

        tracing::debug!(key, records = record_count, update = is_update, "cache set");
        self.schedule_save();

        if is_update {
            let delivered = self.subscribers.notify(CacheUpdate {
                key: key.to_string(),
                data: shared,
            });
            if delivered > 0 {
                tracing::debug!(key, subscribers = delivered, "notified cache subscribers");
            }
        }
    }

    pub fn clear(&self) {
        {
            let mut state = self.lock_state();
            state.entries.clear();
            state.generation += 1;
        }
        tracing::info!(path = %self.path.display(), "package cache cleared");
        self.schedule_save();
    }

    /// Drops entries older than the configured maximum age. With the default
    /// unbounded policy this never removes anything.
    pub fn clear_expired(&self) -> usize {
        let cleared = {
            let mut state = self.lock_state();
            let before = state.entries.len();
            let max_age = self.max_age;
            state
                .entries
                .retain(|_, entry| !entry_expired(max_age, entry));
            let cleared = before - state.entries.len();
            if cleared > 0 {
                state.generation += 1;
            }
            cleared
        };

        if cleared > 0 {
            tracing::info!(cleared, "cleared expired cache entries");
            self.schedule_save();
        }
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock_state();
        CacheStats {
            entry_count: state.entries.len(),
            total_record_count: state.entries.values().map(|entry| entry.data.len()).sum(),
        }
    }

    pub fn subscribe(&self, key: &str) -> CacheSubscription {
        tracing::debug!(key, "subscribed to cache updates");
        self.subscribers.subscribe(key)
    }

    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(key, id)
    }

    /// Callback flavour of [`subscribe`](Self::subscribe): each subscriber is
    /// drained by its own task, so a slow callback never delays another one.
    /// Must be called from within a tokio runtime.
    pub fn subscribe_with<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(CacheUpdate) + Send + 'static,
    {
        let mut subscription = self.subscribe(key);
        let id = subscription.id();
        tokio::spawn(async move {
            while let Some(update) = subscription.recv().await {
                callback(update);
            }
        });
        id
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.subscriber_count(key)
    }

    /// Waits until every mutation made so far has been written (or its write
    /// attempt has failed and been logged).
    pub async fn flush(&self) {
        let target = self.lock_state().generation;
        let mut attempted = self.writer.attempted.subscribe();
        let _ = attempted.wait_for(|generation| *generation >= target).await;
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry_expired(self.max_age, entry)
    }

    fn schedule_save(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                // The writer dies with the runtime that spawned it, so a cache
                // outliving one runtime gets a fresh writer on the next.
                let mut task = self
                    .writer_task
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if task.as_ref().is_none_or(JoinHandle::is_finished) {
                    *task = Some(handle.spawn(writer_loop(
                        Arc::downgrade(&self.state),
                        self.writer.clone(),
                        self.path.clone(),
                    )));
                }
                drop(task);
                self.writer.wake.notify_one();
            }
            Err(_) => self.save_now(),
        }
    }

    fn save_now(&self) {
        let Some((generation, bytes)) = snapshot(&self.state) else {
            return;
        };
        if let Some(Err(error)) = self.writer.persist(&self.path, generation, &bytes) {
            tracing::error!(path = %self.path.display(), message = %error.message, "failed to save package cache");
        }
    }

    // The map stays consistent across any panic in this module, so a poisoned
    // lock is recovered instead of surfaced.
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mutations the background writer has not reached yet are written
/// synchronously, so dropping the cache never loses the latest state.
impl Drop for PackageCache {
    fn drop(&mut self) {
        let pending = self.lock_state().generation > *self.writer.attempted.borrow();
        if pending {
            self.save_now();
        }
        // Lets an idle writer observe that the state is gone and exit.
        self.writer.wake.notify_one();
    }
}

async fn writer_loop(state: Weak<Mutex<CacheState>>, shared: Arc<WriterShared>, path: PathBuf) {
    loop {
        shared.wake.notified().await;

        let Some(state) = state.upgrade() else {
            return;
        };
        let snapshot = snapshot(&state);
        drop(state);

        let Some((generation, bytes)) = snapshot else {
            continue;
        };
        if generation <= *shared.attempted.borrow() {
            continue;
        }

        let target = path.clone();
        let writer = shared.clone();
        match tokio::task::spawn_blocking(move || writer.persist(&target, generation, &bytes)).await
        {
            Ok(None) => {}
            Ok(Some(Ok(()))) => {
                tracing::debug!(path = %path.display(), generation, "package cache saved");
            }
            Ok(Some(Err(error))) => {
                tracing::error!(path = %path.display(), message = %error.message, "failed to save package cache");
            }
            Err(join_error) => {
                tracing::error!(path = %path.display(), error = %join_error, "package cache writer task failed");
                shared.attempted.send_if_modified(|attempted| {
                    let behind = *attempted < generation;
                    if behind {
                        *attempted = generation;
                    }
                    behind
                });
            }
        }
    }
}

fn snapshot(state: &Mutex<CacheState>) -> Option<(u64, Vec<u8>)> {
    let state = state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match serde_json::to_vec_pretty(&state.entries) {
        Ok(bytes) => Some((state.generation, bytes)),
        Err(error) => {
            tracing::error!(error = %error, "failed to serialize package cache");
            None
        }
    }
}

fn entry_expired(max_age: Option<Duration>, entry: &CacheEntry) -> bool {
    let Some(max_age) = max_age else {
        return false;
    };
    let age_millis = now_millis().saturating_sub(entry.timestamp);
    u128::from(age_millis) > max_age.as_millis()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::cache_key;
    use crate::models::PackageSource;

    #[test]
    fn cache_key_is_case_insensitive_in_query() {
        assert_eq!(
            cache_key(PackageSource::Debian, "Vim"),
            cache_key(PackageSource::Debian, "vim")
        );
        assert_eq!(cache_key(PackageSource::Debian, "Vim"), "debian:vim");
    }

    #[test]
    fn cache_key_distinguishes_sources() {
        assert_ne!(
            cache_key(PackageSource::Debian, "vim"),
            cache_key(PackageSource::Flatpak, "vim")
        );
    }
}
