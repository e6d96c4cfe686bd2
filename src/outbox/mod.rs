//! Durable outbox for writes that could not be confirmed delivered.
//!
//! Writes are persisted before any network attempt (write-ahead) and removed
//! only once the remote API acknowledges them, giving at-least-once
//! delivery. Each entry carries a stable idempotency key so a remote that
//! honours it can drop duplicates caused by a lost acknowledgement.

mod reconcile;
mod retry;
mod store;

pub use reconcile::{ReconcileOutcome, ReconcileReport, Reconciler, SubmitOutcome};
pub use retry::RetryPolicy;
pub use store::{OutboxEntry, OutboxId, OutboxStore};
