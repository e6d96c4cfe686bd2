//! Offline data-resilience layer for an order-and-pickup client.
//!
//! Keeps remote catalog and user data usable when the network is slow or
//! gone, and makes sure orders placed offline are delivered eventually:
//!
//! - [`cache`]: segmented in-memory LRU cache, derived-value cache, and a
//!   durable TTL page cache with read-before-network access
//! - [`pressure`]: trims the cache tiers in response to OS memory signals
//! - [`outbox`]: durable write-ahead queue replayed against the remote API
//! - [`engine`]: builds and wires all of the above from [`config::Config`]

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod outbox;
pub mod pressure;
pub mod remote;

pub use engine::{CacheEngine, EngineStats};
pub use error::{CacheError, Result};
