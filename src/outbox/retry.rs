//! Backoff and retry ceiling for outbox delivery.

use chrono::{DateTime, Duration, Utc};

use super::store::OutboxEntry;

/// When a failed entry may be retried, and when to stop trying.
///
/// Backoff doubles per failure from `base_backoff` up to `max_backoff`.
/// Entries that reach `max_retries` are parked: kept, but no longer
/// replayed until requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: Option<u32>,
  pub base_backoff: Duration,
  pub max_backoff: Duration,
}

impl RetryPolicy {
  /// Retry on every run, forever.
  pub fn immediate() -> Self {
    Self {
      max_retries: None,
      base_backoff: Duration::zero(),
      max_backoff: Duration::zero(),
    }
  }

  /// Delay required after the `retries`-th failure.
  pub fn backoff_after(&self, retries: u32) -> Duration {
    if retries == 0 {
      return Duration::zero();
    }
    let factor = 1i64 << (retries - 1).min(40);
    let millis = self
      .base_backoff
      .num_milliseconds()
      .saturating_mul(factor)
      .min(self.max_backoff.num_milliseconds());
    Duration::milliseconds(millis)
  }

  pub fn is_parked(&self, retries: u32) -> bool {
    self.max_retries.is_some_and(|max| retries >= max)
  }

  /// Whether `entry` should be attempted at `now`.
  pub fn is_due(&self, entry: &OutboxEntry, now: DateTime<Utc>) -> bool {
    if self.is_parked(entry.retries) {
      return false;
    }
    match entry.last_attempt {
      Some(last) => now >= last + self.backoff_after(entry.retries),
      None => true,
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: Some(10),
      base_backoff: Duration::seconds(30),
      max_backoff: Duration::hours(1),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(retries: u32, last_attempt: Option<DateTime<Utc>>) -> OutboxEntry {
    OutboxEntry {
      id: 1,
      payload: Vec::new(),
      created_at: Utc::now(),
      retries,
      last_attempt,
    }
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.backoff_after(0), Duration::zero());
    assert_eq!(policy.backoff_after(1), Duration::seconds(30));
    assert_eq!(policy.backoff_after(2), Duration::seconds(60));
    assert_eq!(policy.backoff_after(3), Duration::seconds(120));
    assert_eq!(policy.backoff_after(10), Duration::hours(1));
    assert_eq!(policy.backoff_after(200), Duration::hours(1));
  }

  #[test]
  fn test_due_after_backoff() {
    let policy = RetryPolicy::default();
    let now = Utc::now();

    assert!(policy.is_due(&entry(0, None), now));
    assert!(!policy.is_due(&entry(2, Some(now)), now + Duration::seconds(59)));
    assert!(policy.is_due(&entry(2, Some(now)), now + Duration::seconds(60)));
  }

  #[test]
  fn test_parked_at_ceiling() {
    let policy = RetryPolicy {
      max_retries: Some(3),
      ..RetryPolicy::immediate()
    };
    assert!(!policy.is_parked(2));
    assert!(policy.is_parked(3));
    assert!(!policy.is_due(&entry(3, None), Utc::now()));

    assert!(!RetryPolicy::immediate().is_parked(u32::MAX));
  }
}
