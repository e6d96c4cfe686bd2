use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{CachePolicy, EntityClass, MemoryBudget, PolicyRegistry};
use crate::db::Database;
use crate::error::CacheError;
use crate::outbox::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub storage: StorageConfig,
  pub memory: MemoryConfig,
  pub catalog: CatalogConfig,
  pub ratings: RatingsConfig,
  pub outbox: OutboxConfig,
  /// Needed only for network refresh and outbox delivery
  pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// Database file (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
  /// Heap size the in-memory budget is derived from
  pub max_heap_bytes: usize,
  /// Per-class overrides of the default policy table
  pub policies: Vec<PolicyOverride>,
}

impl Default for MemoryConfig {
  fn default() -> Self {
    Self {
      max_heap_bytes: 256 * 1024 * 1024,
      policies: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyOverride {
  pub class: EntityClass,
  pub share: f64,
  pub ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
  pub page_ttl_secs: i64,
  /// Upper bound on a background refresh triggered by a cache hit
  pub refresh_timeout_secs: u64,
}

impl Default for CatalogConfig {
  fn default() -> Self {
    Self {
      page_ttl_secs: 30 * 60,
      refresh_timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RatingsConfig {
  /// Maximum number of cached rating aggregates
  pub capacity: usize,
  pub ttl_secs: i64,
}

impl Default for RatingsConfig {
  fn default() -> Self {
    Self {
      capacity: 512,
      ttl_secs: 15 * 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
  /// Attempts before an entry is parked; `null` retries forever
  pub max_retries: Option<u32>,
  pub base_backoff_secs: i64,
  pub max_backoff_secs: i64,
  /// Keep delivered entries (stamped) instead of deleting them
  pub retain_delivered: bool,
  pub reconcile_interval_secs: u64,
}

impl Default for OutboxConfig {
  fn default() -> Self {
    Self {
      max_retries: Some(10),
      base_backoff_secs: 30,
      max_backoff_secs: 60 * 60,
      retain_delivered: false,
      reconcile_interval_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  20
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pickup-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pickup-cache/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pickup-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pickup-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Database location, explicit or default.
  pub fn database_path(&self) -> crate::error::Result<PathBuf> {
    match &self.storage.path {
      Some(p) => Ok(p.clone()),
      None => Database::default_path(),
    }
  }

  pub fn memory_budget(&self) -> MemoryBudget {
    MemoryBudget::from_heap_size(self.memory.max_heap_bytes)
  }

  /// Default policy table with this config's overrides applied.
  pub fn policy_registry(&self) -> crate::error::Result<PolicyRegistry> {
    let overrides: Vec<CachePolicy> = self
      .memory
      .policies
      .iter()
      .map(|o| -> crate::error::Result<CachePolicy> {
        let ttl = seconds("memory.policies.ttl_secs", o.ttl_secs)?;
        Ok(CachePolicy::new(o.class, o.share, ttl))
      })
      .collect::<crate::error::Result<_>>()?;
    PolicyRegistry::with_overrides(&overrides)
  }

  pub fn retry_policy(&self) -> crate::error::Result<RetryPolicy> {
    Ok(RetryPolicy {
      max_retries: self.outbox.max_retries,
      base_backoff: seconds("outbox.base_backoff_secs", self.outbox.base_backoff_secs)?,
      max_backoff: seconds("outbox.max_backoff_secs", self.outbox.max_backoff_secs)?,
    })
  }

  pub fn page_ttl(&self) -> crate::error::Result<Duration> {
    seconds("catalog.page_ttl_secs", self.catalog.page_ttl_secs)
  }

  pub fn ratings_ttl(&self) -> crate::error::Result<Duration> {
    seconds("ratings.ttl_secs", self.ratings.ttl_secs)
  }
}

fn seconds(field: &str, value: i64) -> crate::error::Result<Duration> {
  Duration::try_seconds(value)
    .ok_or_else(|| CacheError::InvalidConfig(format!("{} out of range: {}", field, value)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.memory.max_heap_bytes, 256 * 1024 * 1024);
    assert_eq!(config.outbox.max_retries, Some(10));
    assert!(config.remote.is_none());
    assert_eq!(config.memory_budget().bytes(), 32 * 1024 * 1024);
  }

  #[test]
  fn test_full_file() {
    let yaml = r#"
storage:
  path: /tmp/pickup/cache.db
memory:
  max_heap_bytes: 67108864
  policies:
    - class: order_history
      share: 0.2
      ttl_secs: 30
catalog:
  page_ttl_secs: 600
outbox:
  max_retries: null
  retain_delivered: true
remote:
  base_url: https://api.example.com/v1/
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(
      config.database_path().unwrap(),
      PathBuf::from("/tmp/pickup/cache.db")
    );
    assert_eq!(config.memory_budget().bytes(), 8 * 1024 * 1024);
    assert_eq!(config.catalog.page_ttl_secs, 600);
    assert_eq!(config.catalog.refresh_timeout_secs, 15);
    assert_eq!(config.outbox.max_retries, None);
    assert!(config.outbox.retain_delivered);
    assert_eq!(config.remote.as_ref().unwrap().timeout_secs, 20);

    let registry = config.policy_registry().unwrap();
    assert_eq!(
      registry.get(EntityClass::OrderHistory).ttl,
      Duration::seconds(30)
    );
  }

  #[test]
  fn test_overcommitted_override_rejected() {
    let yaml = r#"
memory:
  policies:
    - class: product_list
      share: 0.95
      ttl_secs: 300
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert!(config.policy_registry().is_err());
  }

  #[test]
  fn test_out_of_range_seconds_rejected() {
    let yaml = format!(
      r#"
memory:
  policies:
    - class: order_history
      share: 0.2
      ttl_secs: {max}
catalog:
  page_ttl_secs: {max}
ratings:
  ttl_secs: {max}
outbox:
  max_backoff_secs: {max}
"#,
      max = i64::MAX
    );
    let config = Config::from_yaml(&yaml).unwrap();
    assert!(matches!(
      config.policy_registry(),
      Err(CacheError::InvalidConfig(_))
    ));
    assert!(matches!(config.retry_policy(), Err(CacheError::InvalidConfig(_))));
    assert!(config.page_ttl().is_err());
    assert!(config.ratings_ttl().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/pickup.yaml"))).is_err());
  }
}
