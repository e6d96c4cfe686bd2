//! Flat TTL cache for small computed values (rating aggregates, etc).
//!
//! Bounded by entry count rather than bytes: entries are small and
//! numerous, so measuring each one would cost more than it saves.

use chrono::Duration;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::entry::{CacheEntry, CacheStats};
use crate::clock::Clock;

struct DerivedState<K: Hash + Eq, V> {
  entries: LruCache<K, CacheEntry<V>>,
  next_sequence: u64,
  hits: u64,
  misses: u64,
  evictions: u64,
  expirations: u64,
}

pub struct DerivedCache<K: Hash + Eq, V> {
  name: &'static str,
  capacity: NonZeroUsize,
  ttl: Duration,
  clock: Arc<dyn Clock>,
  state: Mutex<DerivedState<K, V>>,
}

impl<K, V> DerivedCache<K, V>
where
  K: Hash + Eq + Clone,
  V: Clone,
{
  /// Approximate footprint charged per entry
  const ENTRY_BYTES: usize = std::mem::size_of::<K>() + std::mem::size_of::<V>();

  pub fn new(name: &'static str, capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Self {
      name,
      capacity,
      ttl,
      clock,
      state: Mutex::new(DerivedState {
        entries: LruCache::new(capacity),
        next_sequence: 0,
        hits: 0,
        misses: 0,
        evictions: 0,
        expirations: 0,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, DerivedState<K, V>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn put(&self, key: K, value: V) {
    let now = self.clock.now();
    let mut guard = self.lock();
    let state = &mut *guard;

    let sequence = state.next_sequence;
    state.next_sequence += 1;
    let entry = CacheEntry::new(value, now, Self::ENTRY_BYTES, sequence);

    // `push` hands back either the replaced value for this key or the
    // least recently used entry it displaced
    if let Some((displaced, old)) = state.entries.push(key.clone(), entry) {
      if displaced != key {
        state.evictions += 1;
        debug!(
          cache = self.name,
          age_ms = old.age(now).num_milliseconds(),
          "evicted"
        );
      }
    }
  }

  pub fn get(&self, key: &K) -> Option<V> {
    let now = self.clock.now();
    let mut guard = self.lock();
    let state = &mut *guard;

    let expired = match state.entries.peek(key) {
      Some(entry) => entry.is_expired(now, self.ttl),
      None => {
        state.misses += 1;
        return None;
      }
    };

    if expired {
      state.entries.pop(key);
      state.expirations += 1;
      state.misses += 1;
      debug!(cache = self.name, "expired");
      return None;
    }

    state.hits += 1;
    state.entries.get(key).map(|entry| entry.value.clone())
  }

  pub fn invalidate(&self, key: &K) -> bool {
    self.lock().entries.pop(key).is_some()
  }

  pub fn evict_expired(&self) -> usize {
    let now = self.clock.now();
    let mut guard = self.lock();
    let state = &mut *guard;

    let expired: Vec<K> = state
      .entries
      .iter()
      .filter(|(_, entry)| entry.is_expired(now, self.ttl))
      .map(|(key, _)| key.clone())
      .collect();
    for key in &expired {
      state.entries.pop(key);
    }
    state.expirations += expired.len() as u64;
    expired.len()
  }

  pub fn clear_all(&self) -> usize {
    let mut state = self.lock();
    let removed = state.entries.len();
    state.entries.clear();
    removed
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.lock();
    CacheStats {
      hits: state.hits,
      misses: state.misses,
      evictions: state.evictions,
      expirations: state.expirations,
      trimmed: 0,
      entries: state.entries.len(),
      current_size: state.entries.len() * Self::ENTRY_BYTES,
      max_size: self.capacity.get() * Self::ENTRY_BYTES,
    }
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn name(&self) -> &'static str {
    self.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::model::RatingSummary;

  fn summary(average: f32) -> RatingSummary {
    RatingSummary { average, count: 3 }
  }

  #[test]
  fn test_put_get_invalidate() {
    let cache = DerivedCache::new(
      "ratings",
      4,
      Duration::minutes(15),
      Arc::new(ManualClock::default()),
    );
    cache.put(42u64, summary(4.5));

    assert_eq!(cache.get(&42), Some(summary(4.5)));
    assert!(cache.invalidate(&42));
    assert_eq!(cache.get(&42), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
  }

  #[test]
  fn test_capacity_evicts_least_recent() {
    let cache = DerivedCache::new(
      "ratings",
      2,
      Duration::minutes(15),
      Arc::new(ManualClock::default()),
    );
    cache.put(1u64, summary(1.0));
    cache.put(2u64, summary(2.0));
    cache.get(&1);
    cache.put(3u64, summary(3.0));

    assert!(cache.get(&2).is_none());
    assert!(cache.get(&1).is_some());
    assert_eq!(cache.stats().evictions, 1);

    // Overwriting an existing key is not an eviction
    cache.put(3u64, summary(3.5));
    assert_eq!(cache.stats().evictions, 1);
  }

  #[test]
  fn test_ttl_expiry() {
    let clock = Arc::new(ManualClock::default());
    let cache = DerivedCache::new("ratings", 8, Duration::minutes(15), clock.clone());
    cache.put(1u64, summary(1.0));
    cache.put(2u64, summary(2.0));

    clock.advance(Duration::minutes(16));
    assert!(cache.get(&1).is_none());
    assert_eq!(cache.evict_expired(), 1);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().expirations, 2);
  }
}
