//! Shared test utilities: an in-memory database, a recording transport and
//! an app wired to a manual clock.

use std::{ops::Deref, sync::Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{ConnectOptions, DbBackend, Schema};

use crate::{
  audience::StaticAudience,
  clock::ManualClock,
  config::Config,
  entity::{Cadence, DealState, deal},
  notify::{Button, Receipt, Recipient, Transport, TransportError},
  prelude::*,
  state::AppState,
  sv::{NewDeal, NewTier},
};

pub const MERCHANT: i64 = 500;

pub mod test_db {
  use super::*;
  use crate::entity::*;

  /// Creates an in-memory SQLite database with all required tables
  pub async fn setup() -> DatabaseConnection {
    // one connection, otherwise every connection sees its own database
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    let schema = Schema::new(DbBackend::Sqlite);

    let tables = [
      schema.create_table_from_entity(recipient::Entity),
      schema.create_table_from_entity(deal::Entity),
      schema.create_table_from_entity(tier::Entity),
      schema.create_table_from_entity(claim::Entity),
      schema.create_table_from_entity(coupon::Entity),
      schema.create_table_from_entity(batch::Entity),
      schema.create_table_from_entity(item::Entity),
    ];
    for stmt in &tables {
      db.execute(db.get_database_backend().build(stmt)).await.unwrap();
    }

    db
  }
}

#[derive(Debug, Clone)]
pub struct Sent {
  pub address: String,
  pub text: String,
  pub actions: Vec<String>,
  pub at: tokio::time::Instant,
}

/// Keeps everything it is asked to send. Non-numeric addresses are invalid,
/// like chat ids.
#[derive(Default)]
pub struct RecordingTransport {
  sent: Mutex<Vec<Sent>>,
  attempts: DashMap<String, u32>,
  failing: DashMap<String, ()>,
  hanging: DashMap<String, ()>,
}

impl RecordingTransport {
  pub fn fail_address(&self, address: &str) {
    self.failing.insert(address.to_string(), ());
  }

  /// Sends to `address` never complete.
  pub fn hang_address(&self, address: &str) {
    self.hanging.insert(address.to_string(), ());
  }

  pub fn attempts_to(&self, address: &str) -> u32 {
    self.attempts.get(address).map(|n| *n).unwrap_or(0)
  }

  pub fn texts_to(&self, address: &str) -> Vec<String> {
    self.sent_to(address).into_iter().map(|s| s.text).collect()
  }

  /// Button actions of everything sent to `address`, in order.
  pub fn buttons_to(&self, address: &str) -> Vec<String> {
    self.sent_to(address).into_iter().flat_map(|s| s.actions).collect()
  }

  pub fn sent_to(&self, address: &str) -> Vec<Sent> {
    let sent = self.sent.lock().unwrap();
    sent.iter().filter(|s| s.address == address).cloned().collect()
  }

  pub fn total(&self) -> usize {
    self.sent.lock().unwrap().len()
  }

  async fn record(
    &self,
    address: &str,
    text: &str,
    buttons: &[Button],
  ) -> Result<Receipt, TransportError> {
    *self.attempts.entry(address.to_string()).or_default() += 1;

    if self.hanging.contains_key(address) {
      std::future::pending::<()>().await;
    }

    if address.parse::<i64>().is_err() {
      return Err(TransportError::InvalidAddress(address.to_string()));
    }
    if self.failing.contains_key(address) {
      return Err(TransportError::Failed("connection reset".into()));
    }

    let mut sent = self.sent.lock().unwrap();
    sent.push(Sent {
      address: address.to_string(),
      text: text.to_string(),
      actions: buttons.iter().map(|b| b.action.clone()).collect(),
      at: tokio::time::Instant::now(),
    });
    Ok(Receipt { delivery_id: format!("{address}:{}", sent.len()) })
  }
}

#[async_trait]
impl Transport for RecordingTransport {
  async fn send_text(
    &self,
    address: &str,
    text: &str,
  ) -> Result<Receipt, TransportError> {
    self.record(address, text, &[]).await
  }

  async fn send_image(
    &self,
    address: &str,
    _url: &str,
    caption: &str,
  ) -> Result<Receipt, TransportError> {
    self.record(address, caption, &[]).await
  }

  async fn send_buttons(
    &self,
    address: &str,
    text: &str,
    buttons: &[Button],
  ) -> Result<Receipt, TransportError> {
    self.record(address, text, buttons).await
  }

  async fn send_list(
    &self,
    address: &str,
    text: &str,
    items: &[Button],
  ) -> Result<Receipt, TransportError> {
    self.record(address, text, items).await
  }
}

pub fn config() -> Config {
  Config {
    broadcast_delay_step: Duration::ZERO,
    retry_base: Duration::ZERO,
    send_rate_per_second: 100_000,
    send_timeout: Duration::from_secs(5),
    ..Config::default()
  }
}

pub struct TestApp {
  state: Arc<AppState>,
  pub clock: Arc<ManualClock>,
  pub transport: Arc<RecordingTransport>,
  pub audience: Arc<StaticAudience>,
}

impl TestApp {
  /// Noon UTC, outside quiet hours.
  pub async fn new() -> Self {
    Self::at(noon()).await
  }

  pub async fn at(now: DateTime) -> Self {
    Self::with_config(now, config()).await
  }

  pub async fn with_config(now: DateTime, config: Config) -> Self {
    let clock = Arc::new(ManualClock::new(now));
    let transport = Arc::new(RecordingTransport::default());
    let audience = Arc::new(StaticAudience::default());
    let state = AppState::with_db(
      test_db::setup().await,
      config,
      transport.clone(),
      audience.clone(),
      clock.clone(),
    );
    Self { state: Arc::new(state), clock, transport, audience }
  }

  pub fn state(&self) -> Arc<AppState> {
    self.state.clone()
  }
}

impl Deref for TestApp {
  type Target = AppState;

  fn deref(&self) -> &AppState {
    &self.state
  }
}

pub fn noon() -> DateTime {
  NaiveDate::from_ymd_opt(2026, 10, 18)
    .unwrap()
    .and_hms_opt(12, 0, 0)
    .unwrap()
}

pub fn recipient(id: i64, cadence: Cadence) -> Recipient {
  Recipient {
    id,
    address: id.to_string(),
    language: "en".into(),
    cadence,
  }
}

/// A one hour deal around Madrid, starting now.
pub fn new_deal(now: DateTime) -> NewDeal {
  NewDeal {
    merchant_id: MERCHANT,
    title: "Pizza Friday".into(),
    product: "margherita".into(),
    discount_percent: 50,
    max_discount_value: None,
    target_claims: 10,
    starts_at: None,
    expires_at: now + TimeDelta::hours(1),
    coupon_valid_until: None,
    coupon_prefix: None,
    tiers: Vec::new(),
    surprise: None,
    lat: 40.0,
    lng: -3.0,
    radius_km: 5.0,
  }
}

pub async fn live_deal(app: &TestApp, target: i32) -> deal::Model {
  let new = NewDeal { target_claims: target, ..new_deal(app.now()) };
  let deal = app.sv().deals.create(new).await.unwrap();
  assert_eq!(deal.state, DealState::Live);
  deal
}

pub async fn chain_deal(app: &TestApp, tiers: &[NewTier]) -> deal::Model {
  let new = NewDeal {
    target_claims: 100,
    discount_percent: 5,
    tiers: tiers.to_vec(),
    ..new_deal(app.now())
  };
  app.sv().deals.create(new).await.unwrap()
}

/// Plain model for pure functions; never stored.
pub fn deal_model(now: DateTime) -> deal::Model {
  deal::Model {
    id: 1,
    merchant_id: MERCHANT,
    title: "Pizza Friday".into(),
    product: "margherita".into(),
    discount_percent: 50,
    max_discount_value: None,
    target_claims: 10,
    current_claims: 0,
    starts_at: now,
    expires_at: now + TimeDelta::hours(1),
    original_expires_at: now + TimeDelta::hours(1),
    coupon_valid_until: now + TimeDelta::days(7),
    state: DealState::Live,
    current_tier_level: 0,
    coupon_prefix: "FLASH".into(),
    is_surprise: false,
    hidden_title: None,
    hidden_discount: None,
    hidden_product: None,
    was_extended: false,
    bonus_added: false,
    origin_lat: 40.0,
    origin_lng: -3.0,
    radius_km: 5.0,
    notified_count: 0,
    created_at: now,
    activated_at: None,
  }
}
