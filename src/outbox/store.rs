//! SQLite-backed outbox table.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use super::retry::RetryPolicy;
use crate::clock::Clock;
use crate::db::{from_millis, Database};
use crate::error::{CacheError, Result};
use crate::remote::Submission;

pub type OutboxId = i64;

/// A pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
  pub id: OutboxId,
  pub payload: Vec<u8>,
  pub created_at: DateTime<Utc>,
  pub retries: u32,
  pub last_attempt: Option<DateTime<Utc>>,
}

impl OutboxEntry {
  /// Key identifying this write across every retry.
  pub fn idempotency_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.id.to_be_bytes());
    hasher.update(self.created_at.timestamp_millis().to_be_bytes());
    hasher.update(&self.payload);
    hex::encode(hasher.finalize())
  }

  pub fn submission(&self) -> Submission {
    Submission {
      idempotency_key: self.idempotency_key(),
      payload: self.payload.clone(),
    }
  }

  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    let last_attempt: Option<i64> = row.get(4)?;
    Ok(Self {
      id: row.get(0)?,
      payload: row.get(1)?,
      created_at: from_millis(row.get(2)?),
      retries: row.get(3)?,
      last_attempt: last_attempt.map(from_millis),
    })
  }
}

const SELECT_ENTRY: &str = "SELECT id, payload, created_at, retries, last_attempt FROM outbox";

/// Durable queue of pending writes.
#[derive(Clone)]
pub struct OutboxStore {
  db: Database,
  clock: Arc<dyn Clock>,
  /// Stamp delivered rows instead of deleting them
  retain_delivered: bool,
}

impl OutboxStore {
  pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
    Self {
      db,
      clock,
      retain_delivered: false,
    }
  }

  /// Keep delivered entries for auditing until purged.
  pub fn retain_delivered(mut self, retain: bool) -> Self {
    self.retain_delivered = retain;
    self
  }

  /// Persist a new pending write. Returns once the row is committed.
  pub fn enqueue(&self, payload: &[u8]) -> Result<OutboxId> {
    let now = self.clock.now().timestamp_millis();
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT INTO outbox (payload, created_at, retries) VALUES (?, ?, 0)",
        params![payload, now],
      )
      .map_err(|e| CacheError::StoreUnavailable(format!("failed to enqueue write: {}", e)))?;
    let id = conn.last_insert_rowid();
    debug!(id, bytes = payload.len(), "enqueued write");
    Ok(id)
  }

  pub fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>> {
    let entry = self
      .db
      .conn()?
      .query_row(
        &format!("{} WHERE id = ? AND delivered_at IS NULL", SELECT_ENTRY),
        params![id],
        OutboxEntry::from_row,
      )
      .optional()?;
    Ok(entry)
  }

  /// Every undelivered entry in replay order.
  pub fn list_pending(&self) -> Result<Vec<OutboxEntry>> {
    let conn = self.db.conn()?;
    let mut stmt = conn.prepare(&format!(
      "{} WHERE delivered_at IS NULL ORDER BY created_at, id",
      SELECT_ENTRY
    ))?;
    let entries = stmt
      .query_map([], OutboxEntry::from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
  }

  /// Entries `policy` would attempt right now.
  pub fn list_due(&self, policy: &RetryPolicy) -> Result<Vec<OutboxEntry>> {
    let now = self.clock.now();
    Ok(
      self
        .list_pending()?
        .into_iter()
        .filter(|e| policy.is_due(e, now))
        .collect(),
    )
  }

  /// Entries that hit the retry ceiling and need attention.
  pub fn list_parked(&self, policy: &RetryPolicy) -> Result<Vec<OutboxEntry>> {
    Ok(
      self
        .list_pending()?
        .into_iter()
        .filter(|e| policy.is_parked(e.retries))
        .collect(),
    )
  }

  pub fn count_parked(&self, policy: &RetryPolicy) -> Result<usize> {
    match policy.max_retries {
      Some(max) => {
        let count: i64 = self.db.conn()?.query_row(
          "SELECT COUNT(*) FROM outbox WHERE delivered_at IS NULL AND retries >= ?",
          params![max],
          |row| row.get(0),
        )?;
        Ok(count as usize)
      }
      None => Ok(0),
    }
  }

  /// Count a failed attempt. Returns false if the entry no longer exists.
  pub fn record_failure(&self, id: OutboxId) -> Result<bool> {
    let now = self.clock.now().timestamp_millis();
    let updated = self.db.conn()?.execute(
      "UPDATE outbox SET retries = retries + 1, last_attempt = ?
       WHERE id = ? AND delivered_at IS NULL",
      params![now, id],
    )?;
    Ok(updated > 0)
  }

  /// The remote confirmed the write: drop it from the queue.
  pub fn record_success(&self, id: OutboxId) -> Result<bool> {
    let conn = self.db.conn()?;
    let updated = if self.retain_delivered {
      let now = self.clock.now().timestamp_millis();
      conn.execute(
        "UPDATE outbox SET delivered_at = ?, last_attempt = ?
         WHERE id = ? AND delivered_at IS NULL",
        params![now, now, id],
      )?
    } else {
      conn.execute("DELETE FROM outbox WHERE id = ?", params![id])?
    };
    Ok(updated > 0)
  }

  /// Reset a parked entry so it is replayed on the next run.
  pub fn requeue(&self, id: OutboxId) -> Result<bool> {
    let updated = self.db.conn()?.execute(
      "UPDATE outbox SET retries = 0, last_attempt = NULL
       WHERE id = ? AND delivered_at IS NULL",
      params![id],
    )?;
    if updated > 0 {
      info!(id, "requeued outbox entry");
    }
    Ok(updated > 0)
  }

  pub fn count_pending(&self) -> Result<usize> {
    let count: i64 = self.db.conn()?.query_row(
      "SELECT COUNT(*) FROM outbox WHERE delivered_at IS NULL",
      [],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }

  /// Delete retained delivered entries older than `age`.
  pub fn purge_delivered_older_than(&self, age: Duration) -> Result<usize> {
    let cutoff = (self.clock.now() - age).timestamp_millis();
    let removed = self.db.conn()?.execute(
      "DELETE FROM outbox WHERE delivered_at IS NOT NULL AND delivered_at < ?",
      params![cutoff],
    )?;
    Ok(removed)
  }
}
