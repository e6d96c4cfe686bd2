//! In-memory cache split into one LRU segment per entity class.

use std::sync::Arc;

use super::entry::CacheStats;
use super::policy::{EntityClass, MemoryBudget, PolicyRegistry};
use super::segment::Segment;
use super::traits::CacheClass;
use crate::clock::Clock;
use crate::model::{Category, CurrencyConversion, Order, Product, ProductSummary, UserRating};

/// Segment operations that don't depend on the value type.
trait SegmentOps {
  fn trim(&self, percent: u8) -> usize;
  fn evict_expired(&self) -> usize;
  fn clear(&self) -> usize;
  fn stats(&self) -> CacheStats;
}

impl<V> SegmentOps for Segment<V>
where
  V: Clone + serde::Serialize,
{
  fn trim(&self, percent: u8) -> usize {
    Segment::trim(self, percent)
  }

  fn evict_expired(&self) -> usize {
    Segment::evict_expired(self)
  }

  fn clear(&self) -> usize {
    Segment::clear(self)
  }

  fn stats(&self) -> CacheStats {
    Segment::stats(self)
  }
}

/// Segmented in-memory cache.
///
/// Each entity class gets `budget × share` bytes and its own TTL from the
/// policy registry. Values are addressed through [`CacheClass`] tags:
///
/// ```ignore
/// cache.put::<ProductDetails>("product:42", product);
/// let cached: Option<Product> = cache.get::<ProductDetails>("product:42");
/// ```
pub struct SegmentedCache {
  budget: MemoryBudget,
  product_lists: Segment<Vec<ProductSummary>>,
  product_details: Segment<Product>,
  currency_conversions: Segment<CurrencyConversion>,
  category_lists: Segment<Vec<Category>>,
  order_history: Segment<Vec<Order>>,
  user_ratings: Segment<UserRating>,
}

impl SegmentedCache {
  pub fn new(budget: MemoryBudget, registry: &PolicyRegistry, clock: Arc<dyn Clock>) -> Self {
    Self {
      budget,
      product_lists: build_segment(EntityClass::ProductList, budget, registry, &clock),
      product_details: build_segment(EntityClass::ProductDetail, budget, registry, &clock),
      currency_conversions: build_segment(
        EntityClass::CurrencyConversion,
        budget,
        registry,
        &clock,
      ),
      category_lists: build_segment(EntityClass::CategoryList, budget, registry, &clock),
      order_history: build_segment(EntityClass::OrderHistory, budget, registry, &clock),
      user_ratings: build_segment(EntityClass::UserRating, budget, registry, &clock),
    }
  }

  fn segments(&self) -> [(EntityClass, &dyn SegmentOps); 6] {
    [
      (EntityClass::ProductList, &self.product_lists as &dyn SegmentOps),
      (EntityClass::ProductDetail, &self.product_details as &dyn SegmentOps),
      (EntityClass::CurrencyConversion, &self.currency_conversions as &dyn SegmentOps),
      (EntityClass::CategoryList, &self.category_lists as &dyn SegmentOps),
      (EntityClass::OrderHistory, &self.order_history as &dyn SegmentOps),
      (EntityClass::UserRating, &self.user_ratings as &dyn SegmentOps),
    ]
  }

  /// Cache `value` in the segment for `C`. Returns false if it was dropped.
  pub fn put<C: CacheClass>(&self, key: &str, value: C::Value) -> bool {
    C::segment(self).put(key, value)
  }

  pub fn get<C: CacheClass>(&self, key: &str) -> Option<C::Value> {
    C::segment(self).get(key)
  }

  pub fn invalidate<C: CacheClass>(&self, key: &str) -> bool {
    C::segment(self).invalidate(key)
  }

  /// Direct access to the segment for `C`
  pub fn segment<C: CacheClass>(&self) -> &Segment<C::Value> {
    C::segment(self)
  }

  /// Trim the oldest `percent`% of every segment
  pub fn trim(&self, percent: u8) -> usize {
    self.segments().iter().map(|(_, s)| s.trim(percent)).sum()
  }

  pub fn evict_expired(&self) -> usize {
    self.segments().iter().map(|(_, s)| s.evict_expired()).sum()
  }

  pub fn clear_all(&self) -> usize {
    self.segments().iter().map(|(_, s)| s.clear()).sum()
  }

  pub fn stats(&self) -> Vec<(EntityClass, CacheStats)> {
    self
      .segments()
      .iter()
      .map(|(class, s)| (*class, s.stats()))
      .collect()
  }

  /// Stats summed over all segments
  pub fn total_stats(&self) -> CacheStats {
    let per_class = self.stats();
    CacheStats::combine(per_class.iter().map(|(_, s)| s))
  }

  pub fn budget(&self) -> MemoryBudget {
    self.budget
  }
}

fn build_segment<V>(
  class: EntityClass,
  budget: MemoryBudget,
  registry: &PolicyRegistry,
  clock: &Arc<dyn Clock>,
) -> Segment<V>
where
  V: Clone + serde::Serialize,
{
  let policy = registry.get(class);
  Segment::new(
    class.name(),
    budget.quota_for(&policy),
    policy.ttl,
    Arc::clone(clock),
  )
}

/// Tag for product list pages
pub struct ProductLists;
/// Tag for per-product detail
pub struct ProductDetails;
/// Tag for currency conversion results
pub struct CurrencyConversions;
/// Tag for category lists
pub struct CategoryLists;
/// Tag for the user's order history
pub struct OrderHistory;
/// Tag for individual user ratings
pub struct UserRatings;

impl CacheClass for ProductLists {
  type Value = Vec<ProductSummary>;
  const CLASS: EntityClass = EntityClass::ProductList;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value> {
    &cache.product_lists
  }
}

impl CacheClass for ProductDetails {
  type Value = Product;
  const CLASS: EntityClass = EntityClass::ProductDetail;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value> {
    &cache.product_details
  }
}

impl CacheClass for CurrencyConversions {
  type Value = CurrencyConversion;
  const CLASS: EntityClass = EntityClass::CurrencyConversion;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value> {
    &cache.currency_conversions
  }
}

impl CacheClass for CategoryLists {
  type Value = Vec<Category>;
  const CLASS: EntityClass = EntityClass::CategoryList;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value> {
    &cache.category_lists
  }
}

impl CacheClass for OrderHistory {
  type Value = Vec<Order>;
  const CLASS: EntityClass = EntityClass::OrderHistory;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value> {
    &cache.order_history
  }
}

impl CacheClass for UserRatings {
  type Value = UserRating;
  const CLASS: EntityClass = EntityClass::UserRating;

  fn segment(cache: &SegmentedCache) -> &Segment<Self::Value> {
    &cache.user_ratings
  }
}
