//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::policy::EntityClass;
use super::segment::Segment;
use super::segmented::SegmentedCache;

/// Type tag selecting one segment of a [`SegmentedCache`].
///
/// Each tag fixes the value type stored for its entity class, so a lookup
/// can never hand back a value of the wrong type.
pub trait CacheClass: 'static {
  type Value: Clone + Send + Sync + Serialize;

  const CLASS: EntityClass;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value>;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from unexpired cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still within its TTL
  CacheFresh,
  /// Offline mode - network unavailable, serving expired cached data
  Offline,
}
