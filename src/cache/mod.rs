//! Bounded result cache with single-flight population.
//!
//! [`ResultCache`] keeps at most `capacity` values in an [`LruMap`]. A miss
//! installs an in-flight placeholder holding a [`Shared`] future; concurrent
//! callers for the same key await that future instead of starting their own
//! load. The shared future inserts its own result, so the load completes for
//! the remaining waiters even when the caller that started it is cancelled.
//!
//! Errors reach every waiter but are never cached.

mod lru;

pub use lru::LruMap;

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};

type SharedLoad<V, E> = Shared<BoxFuture<'static, Result<Arc<V>, E>>>;

struct Flight<V, E> {
    id: u64,
    future: SharedLoad<V, E>,
}

struct State<K, V, E> {
    entries: LruMap<K, Arc<V>>,
    in_flight: AHashMap<K, Flight<V, E>>,
    next_flight: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader executions started.
    pub loads: u64,
    pub evictions: u64,
    pub entries: usize,
    pub in_flight: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct ResultCache<K, V, E> {
    state: Arc<Mutex<State<K, V, E>>>,
    counters: Arc<Counters>,
}

impl<K, V, E> ResultCache<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: LruMap::new(capacity),
                in_flight: AHashMap::new(),
                next_flight: 0,
            })),
            counters: Arc::new(Counters::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V, E>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached value for `key`, or runs `load` once for all
    /// concurrent callers and caches a successful result.
    ///
    /// `load` is invoked lazily inside the shared future, never while the
    /// cache lock is held.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let future = {
            let mut state = self.lock();

            if let Some(value) = state.entries.get(&key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?key, "cache hit");
                return Ok(Arc::clone(value));
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);

            if let Some(flight) = state.in_flight.get(&key) {
                tracing::debug!(?key, "joining in-flight load");
                flight.future.clone()
            } else {
                tracing::debug!(?key, "cache miss, starting load");
                state.next_flight += 1;
                let id = state.next_flight;
                let future = self.flight(key.clone(), id, load);
                state.in_flight.insert(
                    key,
                    Flight {
                        id,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        future.await
    }

    fn flight<F, Fut>(&self, key: K, id: u64, load: F) -> SharedLoad<V, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);

        async move {
            counters.loads.fetch_add(1, Ordering::Relaxed);
            let result = load().await.map(Arc::new);
            settle(&state, &counters, &key, id, &result);
            result
        }
        .boxed()
        .shared()
    }

    /// Returns a resident value and marks it recently used.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.lock();
        match state.entries.get(key) {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(value))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns a resident value without touching recency or counters.
    pub fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.lock().entries.peek(key).cloned()
    }

    /// Removes the entry and any in-flight load for `key`.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut state = self.lock();
        let resident = state.entries.remove(key).is_some();
        let pending = state.in_flight.remove(key).is_some();
        resident || pending
    }

    /// Removes every entry and in-flight load whose key matches.
    pub fn invalidate_where(&self, mut matches: impl FnMut(&K) -> bool) -> usize {
        let mut state = self.lock();
        let removed = state.entries.retain(|k, _| !matches(k));
        let before = state.in_flight.len();
        state.in_flight.retain(|k, _| !matches(k));
        removed + (before - state.in_flight.len())
    }

    pub fn invalidate_all(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.capacity()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: state.entries.len(),
            in_flight: state.in_flight.len(),
            capacity: state.entries.capacity(),
        }
    }
}

/// Retires flight `id` and caches a successful result, unless the key was
/// invalidated or reloaded while the flight ran.
fn settle<K, V, E>(
    state: &Mutex<State<K, V, E>>,
    counters: &Counters,
    key: &K,
    id: u64,
    result: &Result<Arc<V>, E>,
) where
    K: Hash + Eq + Clone + Debug,
{
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());

    if !state.in_flight.get(key).is_some_and(|f| f.id == id) {
        tracing::debug!(?key, "discarding load for invalidated key");
        return;
    }
    state.in_flight.remove(key);

    if let Ok(value) = result
        && let Some((evicted, _)) = state.entries.insert(key.clone(), Arc::clone(value))
    {
        counters.evictions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?evicted, "evicted least recently used entry");
    }
}

impl<K: Hash + Eq + Clone, V, E> Debug for ResultCache<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("ResultCache")
            .field("entries", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .field("capacity", &state.entries.capacity())
            .finish()
    }
}
