//! Concurrency-safe response cache.
//!
//! Layout: an LRU map from [`CacheKey`] to a per-key slot. The map sits
//! behind a `std::sync::Mutex` that is only held for short map operations
//! and never across an `.await`. Each slot owns a `tokio::sync::Mutex`
//! guarding its entry, held for the whole lookup/compute/update sequence of
//! one request. This gives:
//!
//! - requests for different keys never wait on each other's computation;
//! - at most one computation in flight per key. Callers that queued on the
//!   slot while it ran take its outcome, success or failure, instead of
//!   computing again.
//!
//! The LRU bound only evicts idle slots. While every candidate is busy the
//! map may briefly hold more than `max_entries` slots.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::types::config::CacheConfig;
use crate::types::errors::EvalError;
use crate::types::responses::{Evaluation, ServedFrom};

use super::entry::CacheEntry;
use super::key::CacheKey;

#[derive(Default)]
struct SlotState {
    entry: Option<CacheEntry>,
    /// Outcome of the most recent computation for this key.
    last: Option<Result<Evaluation, EvalError>>,
}

#[derive(Default)]
struct Slot {
    state: tokio::sync::Mutex<SlotState>,
    /// Number of computations finished on this slot.
    completed: AtomicU64,
}

/// A caller's handle on a slot; gives an unused empty slot back on drop,
/// including when the lookup future is cancelled mid-computation.
struct SlotLease<'a> {
    store: &'a CacheStore,
    key: &'a CacheKey,
    slot: Arc<Slot>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        let slot = std::mem::take(&mut self.slot);
        self.store.release(self.key, slot);
    }
}

/// Per-lookup knobs coming from the client request.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions {
    /// Client max-age; tightens the freshness window for this lookup only.
    pub max_age: Option<Duration>,

    /// Do not insert or refresh the entry with the computed answer.
    pub no_store: bool,
}

/// Answer returned by [`CacheStore::get_or_compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub evaluation: Evaluation,
    pub served_from: ServedFrom,
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Current number of slots.
    pub size: usize,

    /// LRU bound, if any.
    pub capacity: Option<usize>,

    /// Requests answered from a fresh entry.
    pub hits: u64,

    /// Requests answered from a stale entry after an upstream failure.
    pub stale_hits: u64,

    /// Requests that found no entry.
    pub misses: u64,

    /// Calls to the compute function.
    pub computations: u64,

    /// Slots dropped by the LRU bound.
    pub evictions: u64,
}

impl CacheStats {
    /// Share of lookups answered from cache (fresh or stale).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.stale_hits;
        let total = served + self.computations;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

/// Response cache with TTL freshness, stale fallback and optional LRU bound.
pub struct CacheStore {
    slots: Mutex<LruCache<CacheKey, Arc<Slot>>>,
    capacity: Option<usize>,
    ttl: Duration,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStore {
    /// Creates a store.
    ///
    /// `max_entries = None` (or zero) means unbounded.
    pub fn new(ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            slots: Mutex::new(LruCache::unbounded()),
            capacity: max_entries.filter(|&cap| cap > 0),
            ttl,
            hits: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a store from the `[cache]` config section.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    /// Freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks `key` up and falls back to `compute` on a miss or a stale entry.
    pub async fn get_or_compute<F, Fut>(&self, key: &CacheKey, compute: F) -> Result<Lookup, EvalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Evaluation, EvalError>>,
    {
        self.get_or_compute_with(key, LookupOptions::default(), compute)
            .await
    }

    /// [`get_or_compute`](Self::get_or_compute) with per-request options.
    ///
    /// - no entry: compute, store, `Computed`
    /// - fresh entry: return it, `FreshCache`, `compute` is not called
    /// - stale entry: compute; on success overwrite it, `Computed`; on
    ///   timeout/unavailable return the old value, `StaleCache`
    /// - a computation for the key finished while this caller was queued:
    ///   its outcome is reused and `compute` is not called
    ///
    /// An error only escapes when there is nothing usable in the cache.
    pub async fn get_or_compute_with<F, Fut>(
        &self,
        key: &CacheKey,
        options: LookupOptions,
        compute: F,
    ) -> Result<Lookup, EvalError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Evaluation, EvalError>>,
    {
        let lease = self.lease(key);
        let ticket = lease.slot.completed.load(Ordering::Acquire);
        let mut state = lease.slot.state.lock().await;

        if lease.slot.completed.load(Ordering::Acquire) != ticket {
            if let Some(outcome) = state.last.clone() {
                return self.share(key, &mut state, outcome);
            }
        }

        if let Some(entry) = state.entry.as_mut() {
            if entry
                .freshness(Utc::now(), self.ttl, options.max_age)
                .is_fresh()
            {
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key.fingerprint(), "Cache hit");
                return Ok(Lookup {
                    evaluation: entry.evaluation(),
                    served_from: ServedFrom::FreshCache,
                });
            }
            tracing::debug!(key = %key.fingerprint(), "Cache entry stale, revalidating");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key.fingerprint(), "Cache miss");
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        let outcome = compute().await;
        state.last = Some(outcome.clone());
        lease.slot.completed.fetch_add(1, Ordering::Release);

        match outcome {
            Ok(evaluation) => {
                if !(options.no_store || evaluation.no_store) {
                    let now = Utc::now();
                    match state.entry.as_mut() {
                        Some(entry) => entry.refresh(evaluation.clone(), now),
                        None => {
                            state.entry = Some(CacheEntry::new(key.clone(), evaluation.clone(), now))
                        }
                    }
                }
                Ok(Lookup {
                    evaluation,
                    served_from: ServedFrom::Computed,
                })
            }
            Err(err) => self.degrade(key, &mut state, err),
        }
    }

    /// Answers a queued caller with the outcome of the computation it waited on.
    fn share(
        &self,
        key: &CacheKey,
        state: &mut SlotState,
        outcome: Result<Evaluation, EvalError>,
    ) -> Result<Lookup, EvalError> {
        match outcome {
            Ok(evaluation) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(entry) = state.entry.as_mut() {
                    entry.hits += 1;
                }
                tracing::debug!(key = %key.fingerprint(), "Joined in-flight computation");
                Ok(Lookup {
                    evaluation,
                    served_from: ServedFrom::FreshCache,
                })
            }
            Err(err) => self.degrade(key, state, err),
        }
    }

    /// Serves the stale entry for upstream failures, otherwise surfaces `err`.
    fn degrade(&self, key: &CacheKey, state: &mut SlotState, err: EvalError) -> Result<Lookup, EvalError> {
        if err.allows_stale() {
            if let Some(entry) = state.entry.as_mut() {
                entry.hits += 1;
                self.stale_hits.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = %key.fingerprint(),
                    error = %err,
                    "Upstream failed, serving stale entry"
                );
                return Ok(Lookup {
                    evaluation: entry.evaluation(),
                    served_from: ServedFrom::StaleCache,
                });
            }
        }
        Err(err)
    }

    /// Inserts (or overwrites) an entry validated now.
    pub async fn insert(&self, key: CacheKey, evaluation: Evaluation) {
        self.insert_validated_at(key, evaluation, Utc::now()).await;
    }

    /// Inserts (or overwrites) an entry with an explicit validation time.
    pub async fn insert_validated_at(
        &self,
        key: CacheKey,
        evaluation: Evaluation,
        validated_at: DateTime<Utc>,
    ) {
        let slot = self.slot(&key);
        let mut state = slot.state.lock().await;
        match state.entry.as_mut() {
            Some(entry) => entry.refresh(evaluation, validated_at),
            None => state.entry = Some(CacheEntry::new(key, evaluation, validated_at)),
        }
    }

    /// Copy of the entry for `key`, without touching LRU order or stats.
    pub async fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let slot = self.lock_slots().peek(key).cloned()?;
        let state = slot.state.lock().await;
        state.entry.clone()
    }

    /// Drops the entry for `key`.
    pub fn invalidate(&self, key: &CacheKey) {
        self.lock_slots().pop(key);
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.lock_slots().clear();
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, LruCache<CacheKey, Arc<Slot>>> {
        // Nothing panics while holding this lock, but recover rather than propagate poison.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lease<'a>(&'a self, key: &'a CacheKey) -> SlotLease<'a> {
        SlotLease {
            store: self,
            key,
            slot: self.slot(key),
        }
    }

    /// Gets or creates the slot for `key`, marking it most recently used.
    fn slot(&self, key: &CacheKey) -> Arc<Slot> {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }

        let slot = Arc::new(Slot::default());
        slots.push(key.clone(), Arc::clone(&slot));
        self.evict_idle(&mut slots, key);
        slot
    }

    /// Drops least recently used slots until the bound holds, skipping any
    /// slot a caller still holds (computing or queued).
    ///
    /// Slot handles are only cloned under the map lock, so a strong count of
    /// one checked under that lock means nobody is using the slot.
    fn evict_idle(&self, slots: &mut LruCache<CacheKey, Arc<Slot>>, keep: &CacheKey) {
        let Some(capacity) = self.capacity else {
            return;
        };

        while slots.len() > capacity {
            let victim = slots
                .iter()
                .rev()
                .find(|&(k, slot)| k != keep && Arc::strong_count(slot) == 1)
                .map(|(k, _)| k.clone());

            let Some(victim) = victim else {
                tracing::debug!(
                    size = slots.len(),
                    capacity,
                    "Every slot busy, cache temporarily over capacity"
                );
                return;
            };

            if let Some(slot) = slots.pop(&victim) {
                let had_entry = slot
                    .state
                    .try_lock()
                    .is_ok_and(|state| state.entry.is_some());
                if had_entry {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %victim.fingerprint(), "Evicted least recently used entry");
                }
            }
        }
    }

    /// Gives a caller's slot handle back, removing the slot if it is empty
    /// and nobody else holds it.
    ///
    /// The handle is dropped under the map lock so the last of several
    /// concurrent leases always sees a strong count of one (the map).
    fn release(&self, key: &CacheKey, slot: Arc<Slot>) {
        let mut slots = self.lock_slots();
        let ours = slots.peek(key).is_some_and(|s| Arc::ptr_eq(s, &slot));
        drop(slot);
        if !ours {
            return;
        }
        let idle_and_empty = slots.peek(key).is_some_and(|s| {
            Arc::strong_count(s) == 1 && s.state.try_lock().is_ok_and(|state| state.entry.is_none())
        });
        if idle_and_empty {
            slots.pop(key);
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
