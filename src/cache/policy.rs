//! Per-entity-class capacity shares and TTLs.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

const MIB: usize = 1024 * 1024;

/// Domain entity classes with their own in-memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
  ProductList,
  ProductDetail,
  CurrencyConversion,
  CategoryList,
  OrderHistory,
  UserRating,
}

impl EntityClass {
  pub const ALL: [EntityClass; 6] = [
    EntityClass::ProductList,
    EntityClass::ProductDetail,
    EntityClass::CurrencyConversion,
    EntityClass::CategoryList,
    EntityClass::OrderHistory,
    EntityClass::UserRating,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      EntityClass::ProductList => "product_list",
      EntityClass::ProductDetail => "product_detail",
      EntityClass::CurrencyConversion => "currency_conversion",
      EntityClass::CategoryList => "category_list",
      EntityClass::OrderHistory => "order_history",
      EntityClass::UserRating => "user_rating",
    }
  }
}

impl std::fmt::Display for EntityClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// Capacity share and TTL for one entity class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachePolicy {
  pub entity_class: EntityClass,
  /// Fraction of the memory budget, in (0, 1]
  pub capacity_share: f64,
  pub ttl: Duration,
}

impl CachePolicy {
  pub fn new(entity_class: EntityClass, capacity_share: f64, ttl: Duration) -> Self {
    Self {
      entity_class,
      capacity_share,
      ttl,
    }
  }
}

/// Static table of policies, one per entity class.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
  policies: Vec<CachePolicy>,
}

impl PolicyRegistry {
  /// Build a registry, rejecting tables whose shares overcommit the budget.
  pub fn new(policies: Vec<CachePolicy>) -> Result<Self> {
    for class in EntityClass::ALL {
      let count = policies.iter().filter(|p| p.entity_class == class).count();
      if count != 1 {
        return Err(CacheError::InvalidPolicy(format!(
          "expected exactly one policy for {}, found {}",
          class, count
        )));
      }
    }

    for policy in &policies {
      if !(policy.capacity_share > 0.0 && policy.capacity_share <= 1.0) {
        return Err(CacheError::InvalidPolicy(format!(
          "share for {} must be in (0, 1], got {}",
          policy.entity_class, policy.capacity_share
        )));
      }
      if policy.ttl <= Duration::zero() {
        return Err(CacheError::InvalidPolicy(format!(
          "ttl for {} must be positive",
          policy.entity_class
        )));
      }
    }

    let total: f64 = policies.iter().map(|p| p.capacity_share).sum();
    // Tolerate float noise from shares like 0.1 + 0.2
    if total > 1.0 + 1e-9 {
      return Err(CacheError::InvalidPolicy(format!(
        "capacity shares sum to {:.3}, must not exceed 1.0",
        total
      )));
    }

    Ok(Self { policies })
  }

  /// Replace the default policy of each class named in `overrides`.
  pub fn with_overrides(overrides: &[CachePolicy]) -> Result<Self> {
    let mut policies = Self::default().policies;
    for o in overrides {
      if let Some(p) = policies.iter_mut().find(|p| p.entity_class == o.entity_class) {
        *p = *o;
      }
    }
    Self::new(policies)
  }

  pub fn get(&self, class: EntityClass) -> CachePolicy {
    // `new` guarantees every class is present
    self
      .policies
      .iter()
      .copied()
      .find(|p| p.entity_class == class)
      .unwrap_or(CachePolicy::new(class, 0.0, Duration::zero()))
  }

  pub fn iter(&self) -> impl Iterator<Item = &CachePolicy> {
    self.policies.iter()
  }
}

impl Default for PolicyRegistry {
  fn default() -> Self {
    Self {
      policies: vec![
        CachePolicy::new(EntityClass::ProductList, 0.30, Duration::minutes(5)),
        CachePolicy::new(EntityClass::ProductDetail, 0.25, Duration::minutes(10)),
        CachePolicy::new(EntityClass::CurrencyConversion, 0.05, Duration::minutes(60)),
        CachePolicy::new(EntityClass::CategoryList, 0.10, Duration::minutes(30)),
        CachePolicy::new(EntityClass::OrderHistory, 0.20, Duration::minutes(2)),
        CachePolicy::new(EntityClass::UserRating, 0.10, Duration::minutes(15)),
      ],
    }
  }
}

/// Process-wide in-memory budget, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
  bytes: usize,
}

impl MemoryBudget {
  pub const MIN_BYTES: usize = 4 * MIB;
  pub const MAX_BYTES: usize = 32 * MIB;

  /// One eighth of the heap, clamped to [4 MiB, 32 MiB].
  pub fn from_heap_size(heap_bytes: usize) -> Self {
    Self {
      bytes: (heap_bytes / 8).clamp(Self::MIN_BYTES, Self::MAX_BYTES),
    }
  }

  /// Exact budget, bypassing the heap clamp.
  pub fn from_bytes(bytes: usize) -> Self {
    Self { bytes }
  }

  pub fn bytes(&self) -> usize {
    self.bytes
  }

  /// Bytes allotted to the class governed by `policy`
  pub fn quota_for(&self, policy: &CachePolicy) -> usize {
    (self.bytes as f64 * policy.capacity_share).floor() as usize
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_budget_clamps_to_bounds() {
    assert_eq!(MemoryBudget::from_heap_size(8 * MIB).bytes(), 4 * MIB);
    assert_eq!(MemoryBudget::from_heap_size(128 * MIB).bytes(), 16 * MIB);
    assert_eq!(MemoryBudget::from_heap_size(1024 * MIB).bytes(), 32 * MIB);
  }

  #[test]
  fn test_default_registry_is_valid() {
    let defaults = PolicyRegistry::default();
    assert!(PolicyRegistry::new(defaults.iter().copied().collect()).is_ok());
    let total: f64 = defaults.iter().map(|p| p.capacity_share).sum();
    assert!(total <= 1.0 + 1e-9);
  }

  #[test]
  fn test_overcommitted_shares_rejected() {
    let overrides = [CachePolicy::new(
      EntityClass::ProductList,
      0.9,
      Duration::minutes(5),
    )];
    let err = PolicyRegistry::with_overrides(&overrides).unwrap_err();
    assert!(matches!(err, CacheError::InvalidPolicy(_)));
  }

  #[test]
  fn test_missing_class_rejected() {
    let policies = vec![CachePolicy::new(
      EntityClass::ProductList,
      0.5,
      Duration::minutes(5),
    )];
    assert!(PolicyRegistry::new(policies).is_err());
  }

  #[test]
  fn test_override_replaces_ttl() {
    let overrides = [CachePolicy::new(
      EntityClass::OrderHistory,
      0.20,
      Duration::seconds(30),
    )];
    let registry = PolicyRegistry::with_overrides(&overrides).unwrap();
    assert_eq!(
      registry.get(EntityClass::OrderHistory).ttl,
      Duration::seconds(30)
    );
  }

  #[test]
  fn test_quota_for_share() {
    let budget = MemoryBudget::from_bytes(1000);
    let policy = CachePolicy::new(EntityClass::ProductList, 0.25, Duration::minutes(5));
    assert_eq!(budget.quota_for(&policy), 250);
  }
}
