//! Read-before-network access to catalog pages.

use chrono::Duration;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pages::{CatalogPage, PageStore};
use super::traits::CacheResult;
use crate::db::blocking;
use crate::remote::{RemoteApi, RemoteError};

/// Catalog access layer sitting between callers, the persistent page
/// cache and the remote API.
///
/// 1. Unexpired cache hit: return it at once and refresh in the background
/// 2. Miss or expired: fetch from network and write through
/// 3. On network failure, serve the expired page if there is one (offline mode)
#[derive(Clone)]
pub struct CatalogRepository {
  pages: PageStore,
  remote: Arc<dyn RemoteApi>,
  /// Lifetime of pages written by this repository
  ttl: Duration,
  refresh_timeout: std::time::Duration,
}

impl CatalogRepository {
  pub fn new(pages: PageStore, remote: Arc<dyn RemoteApi>, ttl: Duration) -> Self {
    Self {
      pages,
      remote,
      ttl,
      refresh_timeout: std::time::Duration::from_secs(15),
    }
  }

  /// Bound background refreshes to `timeout`.
  pub fn with_refresh_timeout(mut self, timeout: std::time::Duration) -> Self {
    self.refresh_timeout = timeout;
    self
  }

  /// Load `key`, discarding the background refresh handle.
  pub async fn load(&self, key: &str) -> Result<CacheResult<Vec<u8>>, RemoteError> {
    self.load_with_refresh(key).await.map(|(result, _)| result)
  }

  /// Load `key`. On a cache hit the handle of the background refresh is
  /// returned too; dropping it does not cancel the refresh.
  pub async fn load_with_refresh(
    &self,
    key: &str,
  ) -> Result<(CacheResult<Vec<u8>>, Option<JoinHandle<()>>), RemoteError> {
    let cached = self.peek(key).await;
    let now = self.pages.clock().now();

    if let Some(page) = &cached {
      if !page.is_expired(now) {
        let refresh = self.spawn_refresh(key);
        let cached_at = page.expires_at - self.ttl;
        return Ok((
          CacheResult::from_cache(page.payload.clone(), cached_at),
          Some(refresh),
        ));
      }
    }

    match self.remote.fetch(key).await {
      Ok(payload) => {
        self.write_through(key, payload.clone()).await;
        Ok((CacheResult::from_network(payload), None))
      }
      Err(e) => match cached {
        Some(page) => {
          info!(key, error = %e, "network unavailable, serving expired page");
          let cached_at = page.expires_at - self.ttl;
          Ok((CacheResult::offline(page.payload, cached_at), None))
        }
        None => Err(e),
      },
    }
  }

  /// Load and decode `key`. A cached page that no longer decodes is
  /// deleted and replaced from the network.
  pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<CacheResult<T>, RemoteError> {
    let result = self.load(key).await?;
    match serde_json::from_slice(&result.data) {
      Ok(data) => Ok(CacheResult {
        data,
        source: result.source,
        cached_at: result.cached_at,
      }),
      Err(e) => {
        warn!(key, error = %e, "discarding undecodable page");
        let pages = self.pages.clone();
        let owned_key = key.to_string();
        if let Err(e) = blocking(move || pages.delete(&owned_key)).await {
          warn!(key, error = %e, "failed to delete undecodable page");
        }

        let payload = self.remote.fetch(key).await?;
        let data = serde_json::from_slice(&payload)
          .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        self.write_through(key, payload).await;
        Ok(CacheResult::from_network(data))
      }
    }
  }

  async fn peek(&self, key: &str) -> Option<CatalogPage> {
    let pages = self.pages.clone();
    let key = key.to_string();
    blocking(move || Ok(pages.peek(&key)))
      .await
      .unwrap_or_else(|e| {
        warn!(error = %e, "page lookup task failed");
        None
      })
  }

  async fn write_through(&self, key: &str, payload: Vec<u8>) {
    if let Err(e) = save(self.pages.clone(), key.to_string(), payload, self.ttl).await {
      warn!(key, error = %e, "failed to cache fetched page");
    }
  }

  fn spawn_refresh(&self, key: &str) -> JoinHandle<()> {
    let remote = Arc::clone(&self.remote);
    let pages = self.pages.clone();
    let ttl = self.ttl;
    let timeout = self.refresh_timeout;
    let key = key.to_string();

    tokio::spawn(async move {
      match tokio::time::timeout(timeout, remote.fetch(&key)).await {
        Ok(Ok(payload)) => {
          if let Err(e) = save(pages, key.clone(), payload, ttl).await {
            warn!(key = %key, error = %e, "failed to store refreshed page");
          }
        }
        // The page already served stays valid
        Ok(Err(e)) => debug!(key = %key, error = %e, "background refresh failed"),
        Err(_) => debug!(key = %key, "background refresh timed out"),
      }
    })
  }
}

async fn save(
  pages: PageStore,
  key: String,
  payload: Vec<u8>,
  ttl: Duration,
) -> crate::error::Result<()> {
  blocking(move || pages.save(&key, &payload, ttl)).await
}
