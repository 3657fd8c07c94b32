use std::sync::Arc;

use async_trait::async_trait;
use tokio::time;

use crate::{plugins::Plugin, prelude::*, state::AppState};

fn every(secs: u64) -> time::Interval {
  let mut interval = time::interval(Duration::from_secs(secs.max(1)));
  interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
  interval
}

pub struct GC;

#[async_trait]
impl Plugin for GC {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = every(60);
    loop {
      interval.tick().await;
      app.gc();
    }
  }
}

/// Starts scheduled deals, expires overdue ones and finishes any
/// activation that was interrupted halfway.
pub struct DealClock;

#[async_trait]
impl Plugin for DealClock {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = every(app.config.deal_sweep_secs);
    loop {
      interval.tick().await;
      let sv = app.sv();

      match sv.deals.start_due().await {
        Ok(ids) if !ids.is_empty() => info!(?ids, "scheduled deals went live"),
        Ok(_) => {}
        Err(err) => error!("start sweep failed: {err}"),
      }
      match sv.deals.expire_due().await {
        Ok(ids) if !ids.is_empty() => info!(?ids, "deals expired"),
        Ok(_) => {}
        Err(err) => error!("expiry sweep failed: {err}"),
      }
      match sv.activation.repair().await {
        Ok(0) => {}
        Ok(n) => warn!(deals = n, "repaired unfinished activations"),
        Err(err) => error!("activation repair failed: {err}"),
      }
    }
  }
}

pub struct RescueSweep;

#[async_trait]
impl Plugin for RescueSweep {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = every(app.config.rescue_sweep_secs);
    loop {
      interval.tick().await;
      match app.sv().rescue.sweep().await {
        Ok(ids) if !ids.is_empty() => info!(?ids, "rescue offers sent"),
        Ok(_) => {}
        Err(err) => error!("rescue sweep failed: {err}"),
      }
    }
  }
}

/// Flushes digests and quiet-hour batches once they come due.
pub struct BatchSweep;

#[async_trait]
impl Plugin for BatchSweep {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = every(app.config.batch_sweep_secs);
    loop {
      interval.tick().await;
      match app.sv().dispatch.deliver_due().await {
        Ok(report) if report.batches > 0 => info!(
          batches = report.batches,
          sent = report.sent,
          skipped = report.skipped,
          failed = report.failed,
          "batches delivered"
        ),
        Ok(_) => {}
        Err(err) => error!("batch sweep failed: {err}"),
      }
    }
  }
}
