use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::{Ack, RemoteApi, RemoteError, Submission};
use crate::config::RemoteConfig;
use crate::error::{CacheError, Result};

/// Remote API client over HTTP.
///
/// Catalog pages are read from `GET {base}/catalog/{key}`; queued writes are
/// posted to `POST {base}/orders` with an `Idempotency-Key` header.
#[derive(Clone)]
pub struct HttpRemoteApi {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpRemoteApi {
  pub fn new(config: &RemoteConfig) -> Result<Self> {
    let base_url = Url::parse(&config.base_url).map_err(|e| {
      CacheError::InvalidConfig(format!("invalid remote base_url {}: {}", config.base_url, e))
    })?;
    if base_url.cannot_be_a_base() {
      return Err(CacheError::InvalidConfig(format!(
        "remote base_url {} cannot be a base",
        config.base_url
      )));
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| CacheError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  /// Append path segments to the base URL, percent-encoding each one.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }
}

fn map_error(err: reqwest::Error) -> RemoteError {
  if err.is_timeout() {
    RemoteError::Timeout
  } else {
    RemoteError::Network(err.to_string())
  }
}

async fn check_status(response: reqwest::Response) -> std::result::Result<Vec<u8>, RemoteError> {
  let status = response.status();
  let body = response.bytes().await.map_err(map_error)?;
  if status.is_success() {
    Ok(body.to_vec())
  } else {
    Err(RemoteError::Status {
      status: status.as_u16(),
      body: String::from_utf8_lossy(&body).into_owned(),
    })
  }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
  async fn fetch(&self, key: &str) -> std::result::Result<Vec<u8>, RemoteError> {
    let response = self
      .client
      .get(self.endpoint(&["catalog", key]))
      .send()
      .await
      .map_err(map_error)?;
    check_status(response).await
  }

  async fn submit(&self, submission: &Submission) -> std::result::Result<Ack, RemoteError> {
    let response = self
      .client
      .post(self.endpoint(&["orders"]))
      .header("Idempotency-Key", &submission.idempotency_key)
      .header("Content-Type", "application/json")
      .body(submission.payload.clone())
      .send()
      .await
      .map_err(map_error)?;
    let body = check_status(response).await?;

    // The id is informational; an unparseable body is still an ack
    let remote_id = serde_json::from_slice::<serde_json::Value>(&body)
      .ok()
      .and_then(|v| match v.get("id")? {
        serde_json::Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
      });
    Ok(Ack { remote_id })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn api(base_url: &str) -> Result<HttpRemoteApi> {
    HttpRemoteApi::new(&RemoteConfig {
      base_url: base_url.to_string(),
      timeout_secs: 5,
    })
  }

  #[test]
  fn test_endpoint_encodes_cache_keys() {
    let api = api("https://api.example.com/v1/").unwrap();
    let url = api.endpoint(&["catalog", "category:7:page 2"]);
    assert_eq!(
      url.as_str(),
      "https://api.example.com/v1/catalog/category:7:page%202"
    );
  }

  #[test]
  fn test_endpoint_without_trailing_slash() {
    let api = api("https://api.example.com/v1").unwrap();
    assert_eq!(
      api.endpoint(&["orders"]).as_str(),
      "https://api.example.com/v1/orders"
    );
  }

  #[test]
  fn test_rejects_invalid_base_url() {
    assert!(matches!(api("not a url"), Err(CacheError::InvalidConfig(_))));
    assert!(matches!(
      api("mailto:ops@example.com"),
      Err(CacheError::InvalidConfig(_))
    ));
  }
}
