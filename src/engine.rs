//! Composition root: builds every tier from configuration and wires the
//! pressure controller to them.

use chrono::Duration;
use std::sync::Arc;
use tracing::info;

use crate::cache::{
  CacheStats, CatalogRepository, DerivedCache, EntityClass, PageStore, SegmentedCache,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::model::RatingSummary;
use crate::outbox::{OutboxStore, Reconciler, RetryPolicy};
use crate::pressure::{MemoryPressureController, MemoryTier, PressureLevel, PressureReport};
use crate::remote::RemoteApi;

/// Snapshot of every tier
#[derive(Debug, Clone)]
pub struct EngineStats {
  pub memory: Vec<(EntityClass, CacheStats)>,
  pub ratings: CacheStats,
  /// Stored pages, expired included
  pub pages: usize,
  pub outbox_pending: usize,
  pub outbox_parked: usize,
}

impl EngineStats {
  pub fn memory_total(&self) -> CacheStats {
    CacheStats::combine(self.memory.iter().map(|(_, s)| s))
  }
}

/// Every cache tier plus the outbox, created together at startup.
pub struct CacheEngine {
  config: Config,
  clock: Arc<dyn Clock>,
  segmented: Arc<SegmentedCache>,
  ratings: Arc<DerivedCache<u64, RatingSummary>>,
  pages: Arc<PageStore>,
  outbox: OutboxStore,
  retry_policy: RetryPolicy,
  page_ttl: Duration,
  pressure: MemoryPressureController,
}

impl CacheEngine {
  /// Open the database named by `config` and build every tier.
  pub fn open(config: Config) -> Result<Self> {
    let db = Database::open(&config.database_path()?)?;
    Self::with_database(config, db, Arc::new(SystemClock))
  }

  pub fn with_database(config: Config, db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
    let registry = config.policy_registry()?;
    let budget = config.memory_budget();
    let retry_policy = config.retry_policy()?;
    let page_ttl = config.page_ttl()?;

    let segmented = Arc::new(SegmentedCache::new(budget, &registry, Arc::clone(&clock)));
    let ratings = Arc::new(DerivedCache::new(
      "rating_summaries",
      config.ratings.capacity,
      config.ratings_ttl()?,
      Arc::clone(&clock),
    ));
    let pages = Arc::new(PageStore::new(db.clone(), Arc::clone(&clock)));
    let outbox =
      OutboxStore::new(db, Arc::clone(&clock)).retain_delivered(config.outbox.retain_delivered);

    // The outbox is not a memory tier and is never registered here
    let pressure = MemoryPressureController::new(vec![
      segmented.clone() as Arc<dyn MemoryTier>,
      ratings.clone() as Arc<dyn MemoryTier>,
      pages.clone() as Arc<dyn MemoryTier>,
    ]);

    info!(
      budget_bytes = budget.bytes(),
      retain_delivered = config.outbox.retain_delivered,
      "cache engine ready"
    );

    Ok(Self {
      config,
      clock,
      segmented,
      ratings,
      pages,
      outbox,
      retry_policy,
      page_ttl,
      pressure,
    })
  }

  pub fn segmented(&self) -> &SegmentedCache {
    &self.segmented
  }

  pub fn ratings(&self) -> &DerivedCache<u64, RatingSummary> {
    &self.ratings
  }

  pub fn pages(&self) -> &PageStore {
    &self.pages
  }

  pub fn outbox(&self) -> &OutboxStore {
    &self.outbox
  }

  pub fn retry_policy(&self) -> &RetryPolicy {
    &self.retry_policy
  }

  pub fn pressure(&self) -> &MemoryPressureController {
    &self.pressure
  }

  /// Read-before-network catalog access backed by this engine's pages.
  pub fn catalog(&self, remote: Arc<dyn RemoteApi>) -> CatalogRepository {
    CatalogRepository::new((*self.pages).clone(), remote, self.page_ttl)
    .with_refresh_timeout(std::time::Duration::from_secs(
      self.config.catalog.refresh_timeout_secs,
    ))
  }

  /// Outbox replay against `remote`.
  pub fn reconciler(&self, remote: Arc<dyn RemoteApi>) -> Reconciler {
    Reconciler::new(
      self.outbox.clone(),
      remote,
      self.retry_policy,
      Arc::clone(&self.clock),
    )
  }

  /// Apply `level` to every registered tier. Store I/O runs on the
  /// blocking pool, never on the calling task's thread.
  pub async fn on_memory_pressure(&self, level: PressureLevel) -> Result<PressureReport> {
    self.pressure.dispatch(level).await
  }

  pub fn stats(&self) -> Result<EngineStats> {
    Ok(EngineStats {
      memory: self.segmented.stats(),
      ratings: self.ratings.stats(),
      pages: self.pages.len()?,
      outbox_pending: self.outbox.count_pending()?,
      outbox_parked: self.outbox.count_parked(&self.retry_policy)?,
    })
  }
}
