use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A cached value with its insertion time.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    /// When the value was stored.
    pub inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Time since the value was stored.
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// True if the entry is younger than `window`.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window
    }
}

/// Keyed store that records when each entry was written.
///
/// Nothing is evicted automatically; callers decide what is stale.
#[derive(Debug)]
pub struct TimedCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K: Eq + Hash, V: Clone> TimedCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` stamped with the current time, replacing any entry.
    pub fn put(&self, key: K, value: V) {
        self.lock().insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// The entry for `key`, regardless of age.
    pub fn get<Q>(&self, key: &Q) -> Option<CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().get(key).cloned()
    }

    /// The value for `key` if it was stored less than `window` ago.
    pub fn get_fresh<Q>(&self, key: &Q, window: Duration) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get(key)
            .filter(|entry| entry.is_fresh(window))
            .map(|entry| entry.value)
    }

    /// Remove and return the entry for `key`.
    pub fn pop<Q>(&self, key: &Q) -> Option<CacheEntry<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<K: Eq + Hash, V: Clone> Default for TimedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
