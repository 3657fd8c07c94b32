use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use migration::{Migrator, MigratorTrait};

use crate::{
  audience::AudienceResolver,
  clock::Clock,
  config::Config,
  notify::{Dispatcher, Transport, dispatcher::BatchKey},
  prelude::*,
  sv,
  sync::{KeyedLocks, OnceCache},
};

pub struct AppState {
  pub db: DatabaseConnection,
  pub config: Config,
  pub clock: Arc<dyn Clock>,
  pub transport: Arc<dyn Transport>,
  pub audience: Arc<dyn AudienceResolver>,
  /// Outbound pacing shared by every send.
  pub limiter: DefaultDirectRateLimiter,
  pub deal_locks: KeyedLocks<i32>,
  pub batch_locks: KeyedLocks<BatchKey>,
  pub once: OnceCache,
}

/// Borrowed view of every service, built per call site.
pub struct Services<'a> {
  pub deals: sv::Deals<'a>,
  pub recipients: sv::Recipients<'a>,
  pub ledger: sv::Ledger<'a>,
  pub coupons: sv::Coupons<'a>,
  pub tiers: sv::Tiers<'a>,
  pub activation: sv::Activation<'a>,
  pub rescue: sv::Rescue<'a>,
  pub flash: sv::Flash<'a>,
  pub dispatch: Dispatcher<'a>,
}

impl AppState {
  pub async fn new(
    config: Config,
    transport: Arc<dyn Transport>,
    audience: Arc<dyn AudienceResolver>,
    clock: Arc<dyn Clock>,
  ) -> anyhow::Result<Self> {
    let db = Database::connect(&config.database_url).await?;
    Migrator::up(&db, None).await?;
    info!("Database ready at {}", config.database_url);

    Ok(Self::with_db(db, config, transport, audience, clock))
  }

  pub fn with_db(
    db: DatabaseConnection,
    config: Config,
    transport: Arc<dyn Transport>,
    audience: Arc<dyn AudienceResolver>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let rate =
      NonZeroU32::new(config.send_rate_per_second).unwrap_or(NonZeroU32::MIN);
    Self {
      db,
      config,
      clock,
      transport,
      audience,
      limiter: RateLimiter::direct(Quota::per_second(rate)),
      deal_locks: KeyedLocks::new(),
      batch_locks: KeyedLocks::new(),
      once: OnceCache::new(),
    }
  }

  pub fn now(&self) -> DateTime {
    self.clock.now()
  }

  pub fn sv(&self) -> Services<'_> {
    Services {
      deals: sv::Deals::new(self),
      recipients: sv::Recipients::new(&self.db, self.clock.as_ref()),
      ledger: sv::Ledger::new(
        &self.db,
        &self.deal_locks,
        &self.config,
        self.clock.as_ref(),
      ),
      coupons: sv::Coupons::new(&self.db, &self.config, self.clock.as_ref()),
      tiers: sv::Tiers::new(self),
      activation: sv::Activation::new(self),
      rescue: sv::Rescue::new(self),
      flash: sv::Flash::new(self),
      dispatch: Dispatcher::new(
        &self.db,
        self.transport.as_ref(),
        &self.limiter,
        &self.batch_locks,
        &self.config,
        self.clock.as_ref(),
      ),
    }
  }

  /// Drops idle locks and expired idempotency markers.
  pub fn gc(&self) {
    let deals = self.deal_locks.gc();
    let batches = self.batch_locks.gc();
    let markers = self.once.gc(self.now());
    if deals + batches + markers > 0 {
      debug!(deals, batches, markers, "gc dropped idle entries");
    }
  }
}
