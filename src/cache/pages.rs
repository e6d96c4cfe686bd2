//! Persistent TTL cache for catalog pages, backed by SQLite.
//!
//! Expiry is lazy: `read` hides expired rows but leaves them in place, so
//! the read-through layer can still serve them when the network is down.
//! `delete_expired` is the only thing that removes them.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::db::{from_millis, Database};
use crate::error::{CacheError, Result};

/// A stored page, expired or not.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
  pub key: String,
  pub payload: Vec<u8>,
  pub expires_at: DateTime<Utc>,
}

impl CatalogPage {
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expires_at <= now
  }
}

/// SQLite-based page storage.
#[derive(Clone)]
pub struct PageStore {
  db: Database,
  clock: Arc<dyn Clock>,
}

impl PageStore {
  pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
    Self { db, clock }
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  /// Write or overwrite `key`, expiring `ttl` from now.
  pub fn save(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<()> {
    let expires_at = self.clock.now() + ttl;
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO catalog_pages (key, payload, expires_at) VALUES (?, ?, ?)",
        params![key, payload, expires_at.timestamp_millis()],
      )
      .map_err(|e| CacheError::StoreUnavailable(format!("failed to save page {}: {}", key, e)))?;
    Ok(())
  }

  /// Serialize `value` as JSON and save it.
  pub fn save_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    self.save(key, &payload, ttl)
  }

  /// The stored row for `key`, whether or not it has expired.
  pub fn peek(&self, key: &str) -> Option<CatalogPage> {
    match self.fetch_row(key) {
      Ok(page) => page,
      Err(e) => {
        warn!(key, error = %e, "page lookup failed, treating as miss");
        None
      }
    }
  }

  /// Payload for `key` if present and unexpired.
  pub fn read(&self, key: &str) -> Option<Vec<u8>> {
    let now = self.clock.now();
    self
      .peek(key)
      .filter(|page| !page.is_expired(now))
      .map(|page| page.payload)
  }

  /// Decode an unexpired page. A row that fails to decode is deleted and
  /// reported as a miss.
  pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let payload = self.read(key)?;
    match serde_json::from_slice(&payload) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(key, error = %e, "discarding undecodable page");
        if let Err(e) = self.delete(key) {
          warn!(key, error = %e, "failed to delete undecodable page");
        }
        None
      }
    }
  }

  /// True when `key` is absent or past its expiry.
  pub fn is_expired(&self, key: &str) -> bool {
    let now = self.clock.now();
    self.peek(key).map_or(true, |page| page.is_expired(now))
  }

  pub fn delete(&self, key: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM catalog_pages WHERE key = ?", params![key])?;
    Ok(removed > 0)
  }

  /// Remove every row whose expiry has passed.
  pub fn delete_expired(&self) -> Result<usize> {
    let now = self.clock.now().timestamp_millis();
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM catalog_pages WHERE expires_at < ?",
        params![now],
      )
      .map_err(|e| CacheError::StoreUnavailable(format!("failed to sweep pages: {}", e)))?;
    debug!(removed, "swept expired pages");
    Ok(removed)
  }

  /// Remove every row whose key starts with `prefix`, e.g. all pages of
  /// one category. The prefix is matched literally.
  pub fn delete_by_prefix(&self, prefix: &str) -> Result<usize> {
    let removed = self
      .db
      .conn()?
      .execute(
        "DELETE FROM catalog_pages WHERE substr(key, 1, ?) = ?",
        params![prefix.chars().count() as i64, prefix],
      )
      .map_err(|e| {
        CacheError::StoreUnavailable(format!("failed to invalidate {}*: {}", prefix, e))
      })?;
    debug!(prefix, removed, "invalidated pages by prefix");
    Ok(removed)
  }

  pub fn clear_all(&self) -> Result<usize> {
    let removed = self.db.conn()?.execute("DELETE FROM catalog_pages", [])?;
    Ok(removed)
  }

  /// Number of stored rows, expired included.
  pub fn len(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM catalog_pages", [], |row| row.get(0))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  fn fetch_row(&self, key: &str) -> Result<Option<CatalogPage>> {
    let conn = self.db.conn()?;
    let row: Option<(Vec<u8>, i64)> = conn
      .query_row(
        "SELECT payload, expires_at FROM catalog_pages WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    Ok(row.map(|(payload, expires_ms)| CatalogPage {
      key: key.to_string(),
      payload,
      expires_at: from_millis(expires_ms),
    }))
  }
}
