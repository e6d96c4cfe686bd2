//! Cache tiers for catalog and user data.
//!
//! - `SegmentedCache`: in-memory, one byte-bounded LRU segment per entity class
//! - `DerivedCache`: small computed values, bounded by entry count
//! - `PageStore`: durable pages with explicit expiry, survives restarts
//! - `CatalogRepository`: read-before-network access over `PageStore`

mod derived;
mod entry;
mod layer;
mod pages;
mod policy;
mod segment;
mod segmented;
mod traits;

pub use derived::DerivedCache;
pub use entry::{CacheEntry, CacheStats};
pub use layer::CatalogRepository;
pub use pages::{CatalogPage, PageStore};
pub use policy::{CachePolicy, EntityClass, MemoryBudget, PolicyRegistry};
pub use segment::Segment;
pub use segmented::{
  CategoryLists, CurrencyConversions, OrderHistory, ProductDetails, ProductLists, SegmentedCache,
  UserRatings,
};
pub use traits::{CacheClass, CacheResult, CacheSource};
