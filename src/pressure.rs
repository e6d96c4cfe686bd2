//! Memory pressure handling across cache tiers.
//!
//! The controller is driven by OS memory signals and only knows tiers
//! through [`MemoryTier`]. The outbox deliberately has no `MemoryTier`
//! implementation: pending writes are never reclaimed for memory.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{DerivedCache, PageStore, SegmentedCache};
use crate::error::{CacheError, Result};

/// OS memory pressure level, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PressureLevel {
  /// App moved to the background
  UiHidden,
  /// Foreground, memory getting low
  RunningLow,
  /// Background, memory low
  Moderate,
  /// Foreground, memory critical
  RunningCritical,
  /// Background, process is next to be killed
  Complete,
}

impl PressureLevel {
  /// Map a platform trim level (5..=80) to a pressure level.
  pub fn from_trim_level(level: i32) -> Option<Self> {
    match level {
      80..=i32::MAX => Some(PressureLevel::Complete),
      60..=79 => Some(PressureLevel::Moderate),
      20..=59 => Some(PressureLevel::UiHidden),
      15..=19 => Some(PressureLevel::RunningCritical),
      5..=14 => Some(PressureLevel::RunningLow),
      _ => None,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      PressureLevel::UiHidden => "ui-hidden",
      PressureLevel::RunningLow => "running-low",
      PressureLevel::Moderate => "moderate",
      PressureLevel::RunningCritical => "running-critical",
      PressureLevel::Complete => "complete",
    }
  }
}

impl FromStr for PressureLevel {
  type Err = CacheError;

  fn from_str(s: &str) -> Result<Self> {
    let normalized = s.trim().to_lowercase().replace('_', "-");
    match normalized.as_str() {
      "ui-hidden" => Ok(PressureLevel::UiHidden),
      "running-low" => Ok(PressureLevel::RunningLow),
      "moderate" => Ok(PressureLevel::Moderate),
      "running-critical" => Ok(PressureLevel::RunningCritical),
      "complete" => Ok(PressureLevel::Complete),
      _ => match normalized.parse::<i32>().ok().and_then(Self::from_trim_level) {
        Some(level) => Ok(level),
        None => Err(CacheError::InvalidConfig(format!(
          "unknown memory pressure level: {}",
          s
        ))),
      },
    }
  }
}

impl std::fmt::Display for PressureLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

/// How a tier is treated under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
  /// Primary in-memory catalog cache: trimmed
  InMemory,
  /// Small computed values: cleared outright
  Derived,
  /// Durable pages: expired rows swept
  Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureAction {
  SweepExpired,
  Trim(u8),
  Clear,
}

impl PressureAction {
  /// What `level` asks of a tier of `kind`, if anything.
  pub fn for_level(level: PressureLevel, kind: TierKind) -> Option<Self> {
    match (level, kind) {
      (PressureLevel::Complete, _) => Some(PressureAction::Clear),
      (PressureLevel::Moderate | PressureLevel::RunningCritical, TierKind::InMemory) => {
        Some(PressureAction::Trim(50))
      }
      (PressureLevel::Moderate | PressureLevel::RunningCritical, TierKind::Derived) => {
        Some(PressureAction::Clear)
      }
      (PressureLevel::RunningLow, TierKind::InMemory) => Some(PressureAction::SweepExpired),
      (_, TierKind::Persistent) | (_, TierKind::Derived) => Some(PressureAction::SweepExpired),
      // Backgrounded apps keep their in-memory catalog for a quick return
      (PressureLevel::UiHidden, TierKind::InMemory) => None,
    }
  }
}

/// A cache tier the controller can reclaim memory from.
pub trait MemoryTier: Send + Sync {
  fn name(&self) -> &str;
  fn kind(&self) -> TierKind;
  fn sweep_expired(&self) -> Result<usize>;
  fn trim(&self, percent: u8) -> Result<usize>;
  fn clear(&self) -> Result<usize>;
}

impl MemoryTier for SegmentedCache {
  fn name(&self) -> &str {
    "segmented"
  }

  fn kind(&self) -> TierKind {
    TierKind::InMemory
  }

  fn sweep_expired(&self) -> Result<usize> {
    Ok(self.evict_expired())
  }

  fn trim(&self, percent: u8) -> Result<usize> {
    Ok(SegmentedCache::trim(self, percent))
  }

  fn clear(&self) -> Result<usize> {
    Ok(self.clear_all())
  }
}

impl<K, V> MemoryTier for DerivedCache<K, V>
where
  K: std::hash::Hash + Eq + Clone + Send,
  V: Clone + Send,
{
  fn name(&self) -> &str {
    DerivedCache::name(self)
  }

  fn kind(&self) -> TierKind {
    TierKind::Derived
  }

  fn sweep_expired(&self) -> Result<usize> {
    Ok(self.evict_expired())
  }

  // Derived values are cheap to recompute; a trim clears them
  fn trim(&self, _percent: u8) -> Result<usize> {
    Ok(self.clear_all())
  }

  fn clear(&self) -> Result<usize> {
    Ok(self.clear_all())
  }
}

impl MemoryTier for PageStore {
  fn name(&self) -> &str {
    "catalog_pages"
  }

  fn kind(&self) -> TierKind {
    TierKind::Persistent
  }

  fn sweep_expired(&self) -> Result<usize> {
    self.delete_expired()
  }

  // Rows are on disk; trimming memory means dropping what is already stale
  fn trim(&self, _percent: u8) -> Result<usize> {
    self.delete_expired()
  }

  fn clear(&self) -> Result<usize> {
    self.clear_all()
  }
}

/// Result of one tier's cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierOutcome {
  pub tier: String,
  pub action: PressureAction,
  /// Entries removed, or why the tier could not be cleaned
  pub result: std::result::Result<usize, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressureReport {
  pub level: PressureLevel,
  pub outcomes: Vec<TierOutcome>,
}

impl PressureReport {
  pub fn removed(&self) -> usize {
    self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).sum()
  }

  pub fn failures(&self) -> usize {
    self.outcomes.iter().filter(|o| o.result.is_err()).count()
  }
}

/// Dispatches pressure levels to every registered tier.
#[derive(Clone, Default)]
pub struct MemoryPressureController {
  tiers: Vec<Arc<dyn MemoryTier>>,
}

impl MemoryPressureController {
  pub fn new(tiers: Vec<Arc<dyn MemoryTier>>) -> Self {
    Self { tiers }
  }

  pub fn register(&mut self, tier: Arc<dyn MemoryTier>) {
    self.tiers.push(tier);
  }

  /// Apply `level` to each tier independently. A failing tier is logged
  /// and does not stop the others.
  pub fn on_memory_pressure(&self, level: PressureLevel) -> PressureReport {
    let mut outcomes = Vec::with_capacity(self.tiers.len());

    for tier in &self.tiers {
      let Some(action) = PressureAction::for_level(level, tier.kind()) else {
        continue;
      };

      let result = match action {
        PressureAction::SweepExpired => tier.sweep_expired(),
        PressureAction::Trim(percent) => tier.trim(percent),
        PressureAction::Clear => tier.clear(),
      };

      if let Err(e) = &result {
        warn!(tier = tier.name(), %level, error = %e, "tier cleanup failed");
      }
      outcomes.push(TierOutcome {
        tier: tier.name().to_string(),
        action,
        result: result.map_err(|e| e.to_string()),
      });
    }

    let report = PressureReport { level, outcomes };
    info!(
      %level,
      removed = report.removed(),
      failures = report.failures(),
      "handled memory pressure"
    );
    report
  }

  /// Run [`Self::on_memory_pressure`] on the blocking pool.
  pub async fn dispatch(&self, level: PressureLevel) -> Result<PressureReport> {
    let controller = self.clone();
    Ok(tokio::task::spawn_blocking(move || controller.on_memory_pressure(level)).await?)
  }
}
