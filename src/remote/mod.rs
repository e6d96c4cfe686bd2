//! Remote API seam: where fresh data comes from and queued writes go.

mod http;

pub use http::HttpRemoteApi;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the remote API. All of them are treated as transient by the
/// outbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  #[error("network error: {0}")]
  Network(String),

  #[error("remote returned status {status}: {body}")]
  Status { status: u16, body: String },

  #[error("request timed out")]
  Timeout,

  #[error("remote returned an undecodable payload: {0}")]
  InvalidPayload(String),
}

/// A queued write as sent to the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
  /// Stable across retries of the same outbox entry
  pub idempotency_key: String,
  pub payload: Vec<u8>,
}

/// Remote acknowledgement of a committed write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
  /// Server-side identifier of the created record, when reported
  pub remote_id: Option<String>,
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
  /// Fetch the current payload for a cache key
  async fn fetch(&self, key: &str) -> Result<Vec<u8>, RemoteError>;

  /// Deliver a queued write
  async fn submit(&self, submission: &Submission) -> Result<Ack, RemoteError>;
}
