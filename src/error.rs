//! Error types for the cache and outbox layer.
//!
//! A cache miss is not an error: reads return `Option`. Everything here is
//! handled inside the crate except where a caller explicitly asks a store
//! for something only the store can answer (e.g. `enqueue`).

use thiserror::Error;

/// Result type alias using [`CacheError`]
pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
  /// A value could not be encoded or decoded
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The durable backing store cannot be reached
  #[error("persistent store unavailable: {0}")]
  StoreUnavailable(String),

  /// Capacity shares or TTLs do not describe a valid budget split
  #[error("invalid cache policy: {0}")]
  InvalidPolicy(String),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}

impl From<rusqlite::Error> for CacheError {
  fn from(err: rusqlite::Error) -> Self {
    CacheError::StoreUnavailable(err.to_string())
  }
}

impl<T> From<std::sync::PoisonError<T>> for CacheError {
  fn from(err: std::sync::PoisonError<T>) -> Self {
    CacheError::StoreUnavailable(format!("lock poisoned: {}", err))
  }
}

impl From<tokio::task::JoinError> for CacheError {
  fn from(err: tokio::task::JoinError) -> Self {
    CacheError::StoreUnavailable(format!("store task failed: {}", err))
  }
}
