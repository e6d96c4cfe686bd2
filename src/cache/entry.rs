//! Cache entry wrapper and statistics.

use chrono::{DateTime, Duration, Utc};

/// A cached value with the bookkeeping every tier needs to judge staleness
/// and capacity.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub value: T,
  pub inserted_at: DateTime<Utc>,
  /// Serialized size, charged against the tier's quota
  pub size_bytes: usize,
  /// Insertion order tiebreaker for entries stamped with the same instant
  pub(crate) sequence: u64,
}

impl<T> CacheEntry<T> {
  pub fn new(value: T, inserted_at: DateTime<Utc>, size_bytes: usize, sequence: u64) -> Self {
    Self {
      value,
      inserted_at,
      size_bytes,
      sequence,
    }
  }

  /// Time since insertion
  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.inserted_at
  }

  /// An entry is stale once strictly more than `ttl` has passed.
  pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
    self.age(now) > ttl
  }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  /// Entries removed by capacity pressure
  pub evictions: u64,
  /// Entries removed because their TTL elapsed
  pub expirations: u64,
  /// Entries removed by memory-pressure trims
  pub trimmed: u64,
  pub entries: usize,
  /// Current size in bytes
  pub current_size: usize,
  /// Capacity in bytes
  pub max_size: usize,
}

impl CacheStats {
  /// Hit ratio (0.0 - 1.0)
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }

  /// Sum of several tiers' stats
  pub fn combine<'a>(stats: impl IntoIterator<Item = &'a CacheStats>) -> CacheStats {
    stats.into_iter().fold(CacheStats::default(), |acc, s| CacheStats {
      hits: acc.hits + s.hits,
      misses: acc.misses + s.misses,
      evictions: acc.evictions + s.evictions,
      expirations: acc.expirations + s.expirations,
      trimmed: acc.trimmed + s.trimmed,
      entries: acc.entries + s.entries,
      current_size: acc.current_size + s.current_size,
      max_size: acc.max_size + s.max_size,
    })
  }
}
