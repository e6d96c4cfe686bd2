//! End-to-end behaviour of the engine with a scripted remote.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pickup_cache::cache::{CacheSource, CategoryLists, ProductDetails, ProductLists, UserRatings};
use pickup_cache::clock::{Clock, ManualClock};
use pickup_cache::config::Config;
use pickup_cache::db::Database;
use pickup_cache::model::{Category, Product, ProductSummary, UserRating};
use pickup_cache::outbox::{ReconcileOutcome, SubmitOutcome};
use pickup_cache::pressure::PressureLevel;
use pickup_cache::remote::{Ack, RemoteApi, RemoteError, Submission};
use pickup_cache::CacheEngine;

/// Remote with a connectivity switch.
struct FakeBackend {
  online: AtomicBool,
  catalog: HashMap<String, Vec<u8>>,
  submitted: Mutex<Vec<Submission>>,
}

impl FakeBackend {
  fn new(online: bool) -> Arc<Self> {
    let mut catalog = HashMap::new();
    catalog.insert("products:coffee:1".to_string(), b"[\"espresso\"]".to_vec());
    catalog.insert("products:tea:1".to_string(), b"[\"sencha\"]".to_vec());
    Arc::new(Self {
      online: AtomicBool::new(online),
      catalog,
      submitted: Mutex::new(Vec::new()),
    })
  }

  fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  fn submissions(&self) -> Vec<Submission> {
    self.submitted.lock().unwrap().clone()
  }
}

#[async_trait]
impl RemoteApi for FakeBackend {
  async fn fetch(&self, key: &str) -> Result<Vec<u8>, RemoteError> {
    if !self.online.load(Ordering::SeqCst) {
      return Err(RemoteError::Network("offline".into()));
    }
    self
      .catalog
      .get(key)
      .cloned()
      .ok_or(RemoteError::Status { status: 404, body: String::new() })
  }

  async fn submit(&self, submission: &Submission) -> Result<Ack, RemoteError> {
    self.submitted.lock().unwrap().push(submission.clone());
    if !self.online.load(Ordering::SeqCst) {
      return Err(RemoteError::Network("offline".into()));
    }
    Ok(Ack { remote_id: Some(format!("order-{}", self.submissions().len())) })
  }
}

fn engine() -> (CacheEngine, Arc<ManualClock>) {
  let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()));
  let db = Database::open_in_memory().unwrap();
  let engine =
    CacheEngine::with_database(Config::default(), db, clock.clone() as Arc<dyn Clock>).unwrap();
  (engine, clock)
}

fn summary(id: u64) -> ProductSummary {
  ProductSummary {
    id,
    name: format!("product {}", id),
    price_cents: 350,
    currency: "EUR".into(),
    thumbnail_url: None,
  }
}

#[tokio::test]
async fn complete_pressure_empties_memory_but_keeps_outbox() {
  let (engine, _clock) = engine();
  let cache = engine.segmented();

  cache.put::<ProductLists>("coffee:1", vec![summary(1), summary(2)]);
  cache.put::<ProductLists>("tea:1", vec![summary(3)]);
  cache.put::<ProductDetails>(
    "1",
    Product {
      id: 1,
      name: "espresso".into(),
      description: None,
      price_cents: 250,
      currency: "EUR".into(),
      category_id: 7,
      available: true,
    },
  );
  cache.put::<CategoryLists>("root", vec![Category { id: 7, name: "coffee".into(), parent_id: None }]);
  cache.put::<UserRatings>("1", UserRating { product_id: 1, stars: 5 });
  assert_eq!(cache.total_stats().entries, 5);

  engine.outbox().enqueue(b"{\"order\":1}").unwrap();
  engine.outbox().enqueue(b"{\"order\":2}").unwrap();

  let report = engine
    .on_memory_pressure(PressureLevel::Complete)
    .await
    .unwrap();
  assert_eq!(report.failures(), 0);

  assert_eq!(engine.outbox().count_pending().unwrap(), 2);
  let memory = engine.stats().unwrap().memory_total();
  assert_eq!(memory.current_size, 0);
  assert_eq!(memory.entries, 0);
}

#[tokio::test]
async fn offline_order_is_delivered_after_reconnect() {
  let (engine, clock) = engine();
  let backend = FakeBackend::new(false);
  let reconciler = engine.reconciler(backend.clone());

  let outcome = reconciler.submit_or_queue(b"{\"item\":42}".to_vec()).await.unwrap();
  let id = match outcome {
    SubmitOutcome::Queued { id, .. } => id,
    other => panic!("expected queued, got {:?}", other),
  };
  assert_eq!(engine.outbox().count_pending().unwrap(), 1);

  backend.set_online(true);

  // Still inside the first backoff window
  match reconciler.run_once().await {
    ReconcileOutcome::Completed(report) => {
      assert_eq!(report.deferred, 1);
      assert_eq!(report.delivered, 0);
    }
    ReconcileOutcome::AlreadyRunning => panic!("no other run in progress"),
  }

  clock.advance(Duration::seconds(31));
  match reconciler.run_once().await {
    ReconcileOutcome::Completed(report) => assert_eq!(report.delivered, 1),
    ReconcileOutcome::AlreadyRunning => panic!("no other run in progress"),
  }

  assert_eq!(engine.outbox().count_pending().unwrap(), 0);
  assert!(engine.outbox().get(id).unwrap().is_none());

  let sent = backend.submissions();
  assert_eq!(sent.len(), 2);
  assert_eq!(sent[0].idempotency_key, sent[1].idempotency_key);
  assert_eq!(sent[1].payload, b"{\"item\":42}".to_vec());
}

#[tokio::test]
async fn online_order_skips_the_queue() {
  let (engine, _clock) = engine();
  let backend = FakeBackend::new(true);

  let outcome = engine
    .reconciler(backend.clone())
    .submit_or_queue(b"{\"item\":1}".to_vec())
    .await
    .unwrap();

  assert!(matches!(outcome, SubmitOutcome::Delivered { .. }));
  assert_eq!(engine.outbox().count_pending().unwrap(), 0);
  assert_eq!(backend.submissions().len(), 1);
}

#[tokio::test]
async fn catalog_serves_expired_pages_while_offline() {
  let (engine, clock) = engine();
  let backend = FakeBackend::new(true);
  let catalog = engine.catalog(backend.clone());

  let first = catalog.load("products:coffee:1").await.unwrap();
  assert!(matches!(first.source, CacheSource::Network));
  catalog.load("products:tea:1").await.unwrap();

  backend.set_online(false);
  clock.advance(Duration::minutes(31));
  assert!(engine.pages().is_expired("products:coffee:1"));

  let stale = catalog.load("products:coffee:1").await.unwrap();
  assert!(matches!(stale.source, CacheSource::Offline));
  assert_eq!(stale.data, b"[\"espresso\"]".to_vec());

  // Nothing cached and nothing reachable
  assert!(catalog.load("products:juice:1").await.is_err());

  assert_eq!(engine.pages().delete_by_prefix("products:coffee").unwrap(), 1);
  assert!(engine.pages().peek("products:coffee:1").is_none());
  assert!(engine.pages().peek("products:tea:1").is_some());
}
