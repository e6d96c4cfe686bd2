//! Replay of queued writes against the remote API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use super::store::{OutboxEntry, OutboxId, OutboxStore};
use crate::clock::Clock;
use crate::db::blocking;
use crate::error::{CacheError, Result};
use crate::remote::{Ack, RemoteApi, RemoteError};

/// Tally of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  pub attempted: usize,
  pub delivered: usize,
  pub failed: usize,
  /// Still inside their backoff window, or claimed by another attempt
  pub deferred: usize,
  /// At the retry ceiling
  pub parked: usize,
  /// The store became unreachable mid-run
  pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
  Completed(ReconcileReport),
  /// Another run holds the queue
  AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  Delivered { id: OutboxId, ack: Ack },
  /// Persisted and left for a later run. `error` is `None` when a
  /// concurrent reconciliation run took the entry first.
  Queued {
    id: OutboxId,
    error: Option<RemoteError>,
  },
}

/// Result of one delivery attempt inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
  Delivered,
  Failed,
  /// The row was settled by someone else while we were submitting
  Settled,
}

/// Ids currently being submitted. An entry is claimed for the length of one
/// attempt so nothing else submits it concurrently.
#[derive(Default)]
struct InFlight {
  ids: Mutex<HashSet<OutboxId>>,
}

impl InFlight {
  fn claim(self: &Arc<Self>, id: OutboxId) -> Option<Claim> {
    let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
    ids.insert(id).then(|| Claim {
      in_flight: Arc::clone(self),
      id,
    })
  }
}

struct Claim {
  in_flight: Arc<InFlight>,
  id: OutboxId,
}

impl Drop for Claim {
  fn drop(&mut self) {
    self
      .in_flight
      .ids
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&self.id);
  }
}

/// Drains the outbox against a [`RemoteApi`].
///
/// Runs are single-flight: a run started while another is in progress
/// returns [`ReconcileOutcome::AlreadyRunning`] without touching the queue.
pub struct Reconciler {
  store: OutboxStore,
  remote: Arc<dyn RemoteApi>,
  policy: RetryPolicy,
  clock: Arc<dyn Clock>,
  run_lock: tokio::sync::Mutex<()>,
  in_flight: Arc<InFlight>,
}

impl Reconciler {
  pub fn new(
    store: OutboxStore,
    remote: Arc<dyn RemoteApi>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      store,
      remote,
      policy,
      clock,
      run_lock: tokio::sync::Mutex::new(()),
      in_flight: Arc::new(InFlight::default()),
    }
  }

  pub fn store(&self) -> &OutboxStore {
    &self.store
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  /// Write-ahead submission: persist `payload`, then try to deliver it
  /// immediately. On failure the entry stays queued for reconciliation.
  pub async fn submit_or_queue(&self, payload: Vec<u8>) -> Result<SubmitOutcome> {
    let store = self.store.clone();
    let entry = blocking(move || {
      let id = store.enqueue(&payload)?;
      store
        .get(id)?
        .ok_or_else(|| CacheError::StoreUnavailable(format!("enqueued entry {} vanished", id)))
    })
    .await?;

    let id = entry.id;
    // The row is visible before the claim, so a running reconciliation
    // may already own it
    let Some(_claim) = self.in_flight.claim(id) else {
      debug!(id, "entry taken by reconciliation, leaving it queued");
      return Ok(SubmitOutcome::Queued { id, error: None });
    };

    match self.remote.submit(&entry.submission()).await {
      Ok(ack) => {
        let store = self.store.clone();
        blocking(move || store.record_success(id)).await?;
        debug!(id, "delivered without queueing");
        Ok(SubmitOutcome::Delivered { id, ack })
      }
      Err(error) => {
        let store = self.store.clone();
        blocking(move || store.record_failure(id)).await?;
        info!(id, error = %error, "write queued for later delivery");
        Ok(SubmitOutcome::Queued {
          id,
          error: Some(error),
        })
      }
    }
  }

  /// Attempt every due entry once, oldest first.
  pub async fn run_once(&self) -> ReconcileOutcome {
    let Ok(_run) = self.run_lock.try_lock() else {
      debug!("reconciliation already running");
      return ReconcileOutcome::AlreadyRunning;
    };

    let mut report = ReconcileReport::default();
    let store = self.store.clone();
    let pending = match blocking(move || store.list_pending()).await {
      Ok(pending) => pending,
      Err(e) => {
        warn!(error = %e, "outbox unavailable, skipping reconciliation");
        report.aborted = true;
        return ReconcileOutcome::Completed(report);
      }
    };

    let now = self.clock.now();
    for entry in pending {
      if self.policy.is_parked(entry.retries) {
        report.parked += 1;
        continue;
      }
      if !self.policy.is_due(&entry, now) {
        report.deferred += 1;
        continue;
      }
      let Some(_claim) = self.in_flight.claim(entry.id) else {
        report.deferred += 1;
        continue;
      };

      // The listing is a snapshot; the entry may have been delivered or
      // retried since then
      match self.still_pending(&entry).await {
        Ok(true) => {}
        Ok(false) => {
          debug!(id = entry.id, "entry changed since listing, skipping");
          report.deferred += 1;
          continue;
        }
        Err(e) => {
          warn!(id = entry.id, error = %e, "outbox unavailable, aborting reconciliation");
          report.aborted = true;
          break;
        }
      }

      report.attempted += 1;
      match self.attempt(&entry).await {
        Ok(Attempt::Delivered) => report.delivered += 1,
        Ok(Attempt::Failed) => report.failed += 1,
        Ok(Attempt::Settled) => report.deferred += 1,
        Err(e) => {
          warn!(id = entry.id, error = %e, "outbox unavailable, aborting reconciliation");
          report.aborted = true;
          break;
        }
      }
    }

    info!(
      attempted = report.attempted,
      delivered = report.delivered,
      failed = report.failed,
      deferred = report.deferred,
      parked = report.parked,
      "reconciliation finished"
    );
    ReconcileOutcome::Completed(report)
  }

  /// Whether `entry` is still pending exactly as it was listed.
  async fn still_pending(&self, entry: &OutboxEntry) -> Result<bool> {
    let store = self.store.clone();
    let id = entry.id;
    let current = blocking(move || store.get(id)).await?;
    Ok(current.is_some_and(|c| c.retries == entry.retries && c.last_attempt == entry.last_attempt))
  }

  /// Submit one entry and record the result.
  async fn attempt(&self, entry: &OutboxEntry) -> Result<Attempt> {
    let id = entry.id;
    let delivered = match self.remote.submit(&entry.submission()).await {
      Ok(_) => true,
      Err(error) => {
        warn!(id, retries = entry.retries, error = %error, "delivery failed");
        false
      }
    };

    // Recording success last means a crash before this point replays the
    // entry rather than losing it
    let store = self.store.clone();
    let recorded = if delivered {
      blocking(move || store.record_success(id)).await?
    } else {
      blocking(move || store.record_failure(id)).await?
    };

    Ok(match (recorded, delivered) {
      (false, _) => {
        debug!(id, "entry already settled elsewhere");
        Attempt::Settled
      }
      (true, true) => Attempt::Delivered,
      (true, false) => Attempt::Failed,
    })
  }

  /// Run reconciliation every `interval` while `connected` is true, and
  /// immediately whenever connectivity comes back. Returns when the
  /// connectivity sender is dropped.
  pub async fn run_while_connected(&self, interval: Duration, mut connected: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        changed = connected.changed() => {
          if changed.is_err() {
            break;
          }
        }
      }

      let is_connected = *connected.borrow();
      if is_connected {
        self.run_once().await;
      }
    }
    debug!("connectivity source closed, reconciliation loop exiting");
  }
}
