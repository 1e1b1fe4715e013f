//! Content-addressed representation cache.
//!
//! Entries are keyed by `(model_id, mode, sequence_hash)` and never change once written.
//! Lookups consult a concurrent in-memory map first and the SQLite store second; new
//! entries are buffered as dirty and persisted in one transaction by [`RepresentationCache::flush`].

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::SqliteStore;

use crate::core::models::sequence::Sequence;
use crate::core::models::variant::Variant;
use crate::engine::config::CacheConfig;
use crate::engine::embedding::{Embedding, InferenceError, RepresentationMode};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store at '{path}' is unavailable: {source}")]
    Unavailable {
        path: String,
        source: rusqlite::Error,
    },
    #[error("Cache store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Cache directory error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries held in memory.
    pub entries: usize,
    /// Rows in the persistent store; zero when there is none or it was dropped after a
    /// tolerated failure.
    pub persisted: usize,
    /// Entries not yet written to the store.
    pub dirty: usize,
    pub degraded: bool,
    pub path: Option<PathBuf>,
}

pub struct RepresentationCache {
    memory: DashMap<CacheKey, Embedding>,
    dirty: Mutex<Vec<(CacheKey, Embedding)>>,
    store: Mutex<Option<SqliteStore>>,
    path: Option<PathBuf>,
    tolerate_store_failure: bool,
    flush_threshold: usize,
    degraded: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RepresentationCache {
    /// Opens the cache described by `config`. Without a path the cache lives in memory only.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the store cannot be opened and store failures are not
    /// tolerated. When they are, the cache starts degraded.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        let mut cache = Self::with_store(None, config);
        let Some(path) = &config.path else {
            return Ok(cache);
        };
        match SqliteStore::open(path) {
            Ok(store) => {
                info!(path = %path.display(), "Representation cache opened.");
                cache.store = Mutex::new(Some(store));
            }
            Err(e) if config.tolerate_store_failure => {
                warn!(path = %path.display(), error = %e, "Cache store unavailable; continuing in memory only.");
                cache.degraded.store(true, Ordering::SeqCst);
            }
            Err(e) => return Err(e),
        }
        Ok(cache)
    }

    /// A session-only cache with no persistent tier.
    pub fn in_memory() -> Self {
        Self::with_store(None, &CacheConfig::default())
    }

    fn with_store(store: Option<SqliteStore>, config: &CacheConfig) -> Self {
        Self {
            memory: DashMap::new(),
            dirty: Mutex::new(Vec::new()),
            store: Mutex::new(store),
            path: config.path.clone(),
            tolerate_store_failure: config.tolerate_store_failure,
            flush_threshold: config.flush_threshold.max(1),
            degraded: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, store: &mut Option<SqliteStore>, error: &CacheError) {
        warn!(error = %error, "Cache store failed; continuing in memory only.");
        *store = None;
        self.degraded.store(true, Ordering::SeqCst);
    }

    /// Memory first, then the store. A store read error degrades the cache when tolerated
    /// and is returned otherwise.
    fn fetch(&self, key: &CacheKey) -> Result<Option<Embedding>, CacheError> {
        if let Some(hit) = self.memory.get(key) {
            return Ok(Some(hit.value().clone()));
        }
        let mut store = lock(&self.store);
        let found = match store.as_ref().map(|s| s.get(key)) {
            Some(Ok(found)) => found,
            Some(Err(e)) if self.tolerate_store_failure => {
                self.degrade(&mut store, &e);
                None
            }
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Cache store read failed.");
                return Err(e);
            }
            None => None,
        };
        drop(store);
        if let Some(embedding) = &found {
            self.memory.insert(key.clone(), embedding.clone());
        }
        Ok(found)
    }

    fn insert(&self, key: CacheKey, embedding: Embedding) {
        self.memory.insert(key.clone(), embedding.clone());
        lock(&self.dirty).push((key, embedding));
    }

    /// Returns the cached value for `sequence` without computing anything. Counts as a hit
    /// when found.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the store cannot be read and store failures are not tolerated.
    pub fn lookup(
        &self,
        sequence: &Sequence,
        model_id: &str,
        mode: RepresentationMode,
    ) -> Result<Option<Embedding>, CacheError> {
        let found = self.fetch(&CacheKey::new(model_id, mode, sequence))?;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    pub fn contains(
        &self,
        sequence: &Sequence,
        model_id: &str,
        mode: RepresentationMode,
    ) -> Result<bool, CacheError> {
        Ok(self.fetch(&CacheKey::new(model_id, mode, sequence))?.is_some())
    }

    /// Returns the cached embedding for `variant`, computing and storing it on a miss.
    ///
    /// The outer error is a store failure that is not tolerated; the inner one comes from
    /// `compute`. Failed computations are not cached.
    pub fn get_or_compute<F>(
        &self,
        variant: &Variant,
        model_id: &str,
        mode: RepresentationMode,
        compute: F,
    ) -> Result<Result<Embedding, InferenceError>, CacheError>
    where
        F: FnOnce(&Sequence) -> Result<Embedding, InferenceError>,
    {
        let key = CacheKey::new(model_id, mode, variant.sequence());
        if let Some(hit) = self.fetch(&key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Ok(hit));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(compute(variant.sequence()).inspect(|embedding| {
            self.insert(key, embedding.clone());
        }))
    }

    /// Bulk form of [`get_or_compute`](Self::get_or_compute).
    ///
    /// Hits are answered from the cache; the distinct missing sequences are passed to
    /// `compute_batch` in one call, which must return one result per sequence. Output is
    /// aligned with `variants`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] before anything is computed if the store cannot be read and
    /// store failures are not tolerated.
    pub fn get_or_compute_many<F>(
        &self,
        variants: &[&Variant],
        model_id: &str,
        mode: RepresentationMode,
        compute_batch: F,
    ) -> Result<Vec<Result<Embedding, InferenceError>>, CacheError>
    where
        F: FnOnce(&[&Sequence]) -> Vec<Result<Embedding, InferenceError>>,
    {
        let keys: Vec<CacheKey> = variants
            .iter()
            .map(|v| CacheKey::new(model_id, mode, v.sequence()))
            .collect();
        let mut results: Vec<Option<Result<Embedding, InferenceError>>> = keys
            .iter()
            .map(|k| Ok(self.fetch(k)?.map(Ok)))
            .collect::<Result<_, CacheError>>()?;

        let mut miss_slot: HashMap<&CacheKey, usize> = HashMap::new();
        let mut missing: Vec<&Sequence> = Vec::new();
        let mut miss_keys: Vec<&CacheKey> = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            if results[i].is_some() {
                continue;
            }
            miss_slot.entry(key).or_insert_with(|| {
                missing.push(variants[i].sequence());
                miss_keys.push(key);
                missing.len() - 1
            });
        }

        let hit_count = results.iter().filter(|r| r.is_some()).count() as u64;
        self.hits.fetch_add(hit_count, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let mut computed = compute_batch(&missing);
            if computed.len() != missing.len() {
                let message = format!(
                    "backend returned {} results for {} sequences",
                    computed.len(),
                    missing.len()
                );
                computed = vec![
                    Err(InferenceError::Backend {
                        model_id: model_id.to_string(),
                        message,
                    });
                    missing.len()
                ];
            }
            for (key, result) in miss_keys.iter().zip(&computed) {
                if let Ok(embedding) = result {
                    self.insert((*key).clone(), embedding.clone());
                }
            }
            for (i, key) in keys.iter().enumerate() {
                if results[i].is_none() {
                    results[i] = Some(computed[miss_slot[key]].clone());
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or(Err(InferenceError::EmptyRepresentation)))
            .collect())
    }

    pub fn dirty_len(&self) -> usize {
        lock(&self.dirty).len()
    }

    /// Persists dirty entries, returning how many rows were written.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the write fails and store failures are not tolerated; the
    /// entries stay dirty for a later attempt.
    pub fn flush(&self) -> Result<usize, CacheError> {
        let pending = std::mem::take(&mut *lock(&self.dirty));
        if pending.is_empty() {
            return Ok(0);
        }
        let mut store = lock(&self.store);
        let Some(active) = store.as_mut() else {
            return Ok(0);
        };
        match active.put_many(&pending) {
            Ok(written) => {
                debug!(written, "Flushed representation cache.");
                Ok(written)
            }
            Err(e) if self.tolerate_store_failure => {
                self.degrade(&mut store, &e);
                Ok(0)
            }
            Err(e) => {
                drop(store);
                lock(&self.dirty).extend(pending);
                Err(e)
            }
        }
    }

    /// Flushes once at least `flush_threshold` entries are dirty.
    pub fn flush_if_needed(&self) -> Result<usize, CacheError> {
        if self.dirty_len() >= self.flush_threshold {
            self.flush()
        } else {
            Ok(0)
        }
    }

    /// # Errors
    ///
    /// Returns [`CacheError`] if the store cannot be counted.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let persisted = match lock(&self.store).as_ref() {
            Some(store) => store.len()?,
            None => 0,
        };
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.memory.len(),
            persisted,
            dirty: self.dirty_len(),
            degraded: self.is_degraded(),
            path: self.path.clone(),
        })
    }

    /// Removes every entry from both tiers.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.memory.clear();
        lock(&self.dirty).clear();
        let removed = match lock(&self.store).as_ref() {
            Some(store) => store.clear()?,
            None => 0,
        };
        info!(removed, "Cleared representation cache.");
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn with_store_ref<R>(&self, f: impl FnOnce(&SqliteStore) -> R) -> Option<R> {
        lock(&self.store).as_ref().map(f)
    }

    /// Flushes and releases the store.
    pub fn close(self) -> Result<CacheStats, CacheError> {
        self.flush()?;
        let stats = self.stats()?;
        lock(&self.store).take();
        Ok(stats)
    }
}

impl Drop for RepresentationCache {
    fn drop(&mut self) {
        if self.dirty_len() > 0 {
            if let Err(e) = self.flush() {
                warn!(error = %e, "Unflushed cache entries were lost.");
            }
        }
    }
}
