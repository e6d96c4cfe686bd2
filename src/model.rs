//! Catalog and order values held by the in-memory tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Product as shown in list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
  pub id: u64,
  pub name: String,
  pub price_cents: i64,
  pub currency: String,
  pub thumbnail_url: Option<String>,
}

/// Full product details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub id: u64,
  pub name: String,
  pub description: Option<String>,
  pub price_cents: i64,
  pub currency: String,
  pub category_id: u64,
  pub available: bool,
}

/// Result of converting an amount between currencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyConversion {
  pub from: String,
  pub to: String,
  pub rate: f64,
  pub amount_cents: i64,
  pub converted_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: u64,
  pub name: String,
  pub parent_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
  pub product_id: u64,
  pub quantity: u32,
}

/// A past order as listed in the order history screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: String,
  pub status: String, // "placed", "ready", "picked_up", "cancelled"
  pub total_cents: i64,
  pub currency: String,
  pub placed_at: DateTime<Utc>,
  pub lines: Vec<OrderLine>,
}

/// A user's star rating for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRating {
  pub product_id: u64,
  pub stars: u8,
}

/// Aggregate rating computed from individual ratings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
  pub average: f32,
  pub count: u32,
}
