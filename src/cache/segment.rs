//! Byte-bounded LRU segment with TTL, one per entity class.
//!
//! Capacity eviction follows recency (least recently inserted or read goes
//! first). Memory-pressure trims follow insertion time instead, so the
//! oldest data is shed regardless of how hot it is.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheStats};
use crate::clock::Clock;

/// State guarded by the segment mutex. Counters live here so they change
/// in the same critical section as the structure they describe.
struct SegmentState<V> {
  entries: LruCache<String, CacheEntry<V>>,
  current_size: usize,
  next_sequence: u64,
  hits: u64,
  misses: u64,
  evictions: u64,
  expirations: u64,
  trimmed: u64,
}

impl<V> SegmentState<V> {
  fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
    let entry = self.entries.pop(key)?;
    self.current_size -= entry.size_bytes;
    Some(entry)
  }
}

pub struct Segment<V> {
  name: &'static str,
  quota: usize,
  ttl: Duration,
  clock: Arc<dyn Clock>,
  state: Mutex<SegmentState<V>>,
}

impl<V> Segment<V>
where
  V: Clone + Serialize,
{
  pub fn new(name: &'static str, quota: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
    Self {
      name,
      quota,
      ttl,
      clock,
      state: Mutex::new(SegmentState {
        entries: LruCache::unbounded(),
        current_size: 0,
        next_sequence: 0,
        hits: 0,
        misses: 0,
        evictions: 0,
        expirations: 0,
        trimmed: 0,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, SegmentState<V>> {
    // Every mutation completes inside one critical section, so a poisoned
    // state is still consistent.
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Insert `value` under `key`, evicting least recently used entries until
  /// the segment is back under quota.
  ///
  /// Returns false when the value was dropped: it failed to serialize or
  /// is larger than the whole quota.
  pub fn put(&self, key: &str, value: V) -> bool {
    // Measured outside the lock
    let size_bytes = match serde_json::to_vec(&value) {
      Ok(bytes) => bytes.len(),
      Err(e) => {
        warn!(segment = self.name, key, error = %e, "dropping put: value failed to serialize");
        return false;
      }
    };

    if size_bytes > self.quota {
      warn!(
        segment = self.name,
        key,
        size_bytes,
        quota = self.quota,
        "dropping put: value larger than segment quota"
      );
      return false;
    }

    let now = self.clock.now();
    let mut guard = self.lock();
    let state = &mut *guard;

    let sequence = state.next_sequence;
    state.next_sequence += 1;

    if let Some((_, replaced)) = state
      .entries
      .push(key.to_string(), CacheEntry::new(value, now, size_bytes, sequence))
    {
      state.current_size -= replaced.size_bytes;
    }
    state.current_size += size_bytes;

    while state.current_size > self.quota {
      let Some((evicted_key, evicted)) = state.entries.pop_lru() else {
        break;
      };
      state.current_size -= evicted.size_bytes;
      state.evictions += 1;
      debug!(
        segment = self.name,
        key = %evicted_key,
        age_ms = evicted.age(now).num_milliseconds(),
        "evicted"
      );
    }

    true
  }

  /// Look up `key`. Expired entries are removed and reported as a miss.
  pub fn get(&self, key: &str) -> Option<V> {
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
      if let Some(entry) = state.remove(key) {
        state.expirations += 1;
        debug!(
          segment = self.name,
          key,
          age_ms = entry.age(now).num_milliseconds(),
          "expired"
        );
      }
      state.misses += 1;
      return None;
    }

    state.hits += 1;
    state.entries.get(key).map(|entry| entry.value.clone())
  }

  /// Remove a single entry
  pub fn invalidate(&self, key: &str) -> bool {
    self.lock().remove(key).is_some()
  }

  /// Remove the oldest `percent`% of entries by insertion time, ignoring
  /// recency of access. Rounds up so a non-zero trim of a non-empty
  /// segment always frees something.
  pub fn trim(&self, percent: u8) -> usize {
    let percent = usize::from(percent.min(100));
    let mut guard = self.lock();
    let state = &mut *guard;

    let count = (state.entries.len() * percent).div_ceil(100);
    if count == 0 {
      return 0;
    }

    let mut victims: Vec<(DateTime<Utc>, u64, String)> = state
      .entries
      .iter()
      .map(|(key, entry)| (entry.inserted_at, entry.sequence, key.clone()))
      .collect();
    victims.sort_unstable();

    let mut removed = 0;
    for (_, _, key) in victims.into_iter().take(count) {
      if state.remove(&key).is_some() {
        removed += 1;
      }
    }
    state.trimmed += removed as u64;

    debug!(segment = self.name, percent, removed, "trimmed");
    removed
  }

  /// Remove every entry whose TTL has elapsed
  pub fn evict_expired(&self) -> usize {
    let now = self.clock.now();
    let mut guard = self.lock();
    let state = &mut *guard;

    let expired: Vec<String> = state
      .entries
      .iter()
      .filter(|(_, entry)| entry.is_expired(now, self.ttl))
      .map(|(key, _)| key.clone())
      .collect();

    for key in &expired {
      state.remove(key);
    }
    state.expirations += expired.len() as u64;

    if !expired.is_empty() {
      debug!(segment = self.name, removed = expired.len(), "swept expired");
    }
    expired.len()
  }

  /// Remove everything. Counters other than size are kept.
  pub fn clear(&self) -> usize {
    let mut state = self.lock();
    let removed = state.entries.len();
    state.entries.clear();
    state.current_size = 0;
    removed
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.lock();
    CacheStats {
      hits: state.hits,
      misses: state.misses,
      evictions: state.evictions,
      expirations: state.expirations,
      trimmed: state.trimmed,
      entries: state.entries.len(),
      current_size: state.current_size,
      max_size: self.quota,
    }
  }

  pub fn len(&self) -> usize {
    self.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &str) -> bool {
    self.lock().entries.contains(key)
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn quota(&self) -> usize {
    self.quota
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;

  // "x" serializes to three bytes: "\"x\""
  fn three_byte_value(c: char) -> String {
    c.to_string()
  }

  fn segment(quota: usize, clock: Arc<ManualClock>) -> Segment<String> {
    Segment::new("test", quota, Duration::minutes(5), clock)
  }

  #[test]
  fn test_put_then_get() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(100, clock);

    assert!(seg.put("k", "value".to_string()));
    assert_eq!(seg.get("k"), Some("value".to_string()));
    assert_eq!(seg.stats().hits, 1);
  }

  #[test]
  fn test_expired_entry_is_a_miss_and_stays_gone() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(100, clock.clone());
    seg.put("k", "value".to_string());

    clock.advance(Duration::minutes(4));
    assert!(seg.get("k").is_some());

    clock.advance(Duration::minutes(2));
    assert_eq!(seg.get("k"), None);
    assert_eq!(seg.get("k"), None);

    let stats = seg.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.evictions, 0);
    assert_eq!(stats.current_size, 0);
  }

  #[test]
  fn test_capacity_eviction_scenario() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(10, clock);

    for (i, c) in ['1', '2', '3', '4', '5'].into_iter().enumerate() {
      seg.put(&format!("k{}", i + 1), three_byte_value(c));
      if i == 3 {
        // k4 pushed size to 12, k1 went
        assert!(!seg.contains("k1"));
        assert_eq!(seg.stats().current_size, 9);
      }
    }

    assert!(!seg.contains("k2"));
    let stats = seg.stats();
    assert_eq!(stats.current_size, 9);
    assert_eq!(stats.evictions, 2);
    assert_eq!(seg.len(), 3);
  }

  #[test]
  fn test_read_refreshes_recency() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(10, clock);

    seg.put("k1", three_byte_value('1'));
    seg.put("k2", three_byte_value('2'));
    seg.put("k3", three_byte_value('3'));
    seg.get("k1");
    seg.put("k4", three_byte_value('4'));

    assert!(seg.contains("k1"));
    assert!(!seg.contains("k2"));
  }

  #[test]
  fn test_trim_removes_oldest_inserted_regardless_of_reads() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(1000, clock.clone());

    for i in 0..10 {
      seg.put(&format!("k{}", i), three_byte_value('x'));
      clock.advance(Duration::seconds(1));
    }
    // Touch the oldest half so they are the most recently used
    for i in 0..5 {
      assert!(seg.get(&format!("k{}", i)).is_some());
    }

    assert_eq!(seg.trim(50), 5);
    for i in 0..5 {
      assert!(!seg.contains(&format!("k{}", i)));
    }
    for i in 5..10 {
      assert!(seg.contains(&format!("k{}", i)));
    }
    assert_eq!(seg.stats().trimmed, 5);
    assert_eq!(seg.stats().evictions, 0);
  }

  #[test]
  fn test_trim_same_instant_uses_insertion_order() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(1000, clock);

    for i in 0..4 {
      seg.put(&format!("k{}", i), three_byte_value('x'));
    }
    assert_eq!(seg.trim(50), 2);
    assert!(!seg.contains("k0"));
    assert!(!seg.contains("k1"));
    assert!(seg.contains("k2"));
  }

  #[test]
  fn test_replacing_key_adjusts_size_without_eviction() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(100, clock);

    seg.put("k", "a".to_string());
    seg.put("k", "abcd".to_string());

    let stats = seg.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.current_size, 6);
    assert_eq!(stats.evictions, 0);
  }

  #[test]
  fn test_oversized_value_dropped() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(4, clock);
    seg.put("small", three_byte_value('s'));

    assert!(!seg.put("big", "too large".to_string()));
    assert!(seg.contains("small"));
    assert_eq!(seg.stats().evictions, 0);
  }

  #[test]
  fn test_serialization_failure_drops_put() {
    #[derive(Clone)]
    struct Unserializable;

    impl Serialize for Unserializable {
      fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("not serializable"))
      }
    }

    let clock = Arc::new(ManualClock::default());
    let seg: Segment<Unserializable> = Segment::new("test", 100, Duration::minutes(1), clock);

    assert!(!seg.put("k", Unserializable));
    assert!(seg.is_empty());
    assert!(seg.get("k").is_none());
  }

  #[test]
  fn test_evict_expired_sweeps_only_stale() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(100, clock.clone());

    seg.put("old", three_byte_value('o'));
    clock.advance(Duration::minutes(4));
    seg.put("new", three_byte_value('n'));
    clock.advance(Duration::minutes(2));

    assert_eq!(seg.evict_expired(), 1);
    assert!(seg.contains("new"));
    assert_eq!(seg.stats().current_size, 3);
  }

  #[test]
  fn test_clear() {
    let clock = Arc::new(ManualClock::default());
    let seg = segment(100, clock);
    seg.put("a", three_byte_value('a'));
    seg.put("b", three_byte_value('b'));

    assert_eq!(seg.clear(), 2);
    assert!(seg.is_empty());
    assert_eq!(seg.stats().current_size, 0);
  }
}
