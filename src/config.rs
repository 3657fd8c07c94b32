use std::{env, str::FromStr};

use anyhow::Context;
use chrono::{FixedOffset, NaiveTime, Offset};

use crate::prelude::*;

pub const DEFAULT_COUPON_PREFIX: &str = "FLASH";

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub telegram_token: Option<String>,
  pub port: u16,
  /// JSON list of audience members to load at startup.
  pub audience_file: Option<String>,

  /// Local wall-clock offset used for quiet hours and cadence slots.
  pub utc_offset: FixedOffset,
  pub quiet_start: NaiveTime,
  pub quiet_end: NaiveTime,

  pub broadcast_batch_size: usize,
  pub broadcast_delay_step: Duration,
  pub send_rate_per_second: u32,
  pub send_timeout: Duration,
  pub send_attempts: u32,
  pub retry_base: Duration,
  pub digest_threshold: usize,

  pub claim_retries: u32,
  pub coupon_code_attempts: u32,
  pub coupon_prefix: String,

  pub rescue_window: Duration,
  pub rescue_ratio_percent: i32,
  pub rescue_extension: Duration,
  pub rescue_max_extension: Duration,
  pub rescue_bonus_percent: i32,
  pub max_discount_percent: i32,

  pub marker_ttl: Duration,
  pub rescue_sweep_secs: u64,
  pub deal_sweep_secs: u64,
  pub batch_sweep_secs: u64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      database_url: "sqlite:flashmob.db?mode=rwc".into(),
      telegram_token: None,
      port: 3000,
      audience_file: None,
      utc_offset: Utc.fix(),
      quiet_start: hm(22, 0),
      quiet_end: hm(7, 0),
      broadcast_batch_size: 50,
      broadcast_delay_step: Duration::from_secs(1),
      send_rate_per_second: 25,
      send_timeout: Duration::from_secs(10),
      send_attempts: 3,
      retry_base: Duration::from_secs(1),
      digest_threshold: 3,
      claim_retries: 3,
      coupon_code_attempts: 8,
      coupon_prefix: DEFAULT_COUPON_PREFIX.into(),
      rescue_window: Duration::from_secs(5 * 60),
      rescue_ratio_percent: 80,
      rescue_extension: Duration::from_secs(15 * 60),
      rescue_max_extension: Duration::from_secs(30 * 60),
      rescue_bonus_percent: 5,
      max_discount_percent: 90,
      marker_ttl: Duration::from_secs(60 * 60),
      rescue_sweep_secs: 30,
      deal_sweep_secs: 15,
      batch_sweep_secs: 60,
    }
  }
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    let mut cfg = Self::default();

    if let Ok(url) = env::var("DATABASE_URL") {
      cfg.database_url = url;
    }
    cfg.telegram_token = env::var("TELOXIDE_TOKEN").ok();
    cfg.audience_file = env::var("AUDIENCE_FILE").ok();

    parse_var("PORT", &mut cfg.port)?;

    if let Some(minutes) = var::<i32>("UTC_OFFSET_MINUTES")? {
      cfg.utc_offset = FixedOffset::east_opt(minutes * 60)
        .context("UTC_OFFSET_MINUTES out of range")?;
    }
    if let Ok(start) = env::var("QUIET_HOURS_START") {
      cfg.quiet_start = NaiveTime::parse_from_str(&start, "%H:%M")
        .context("QUIET_HOURS_START must be HH:MM")?;
    }
    if let Ok(end) = env::var("QUIET_HOURS_END") {
      cfg.quiet_end = NaiveTime::parse_from_str(&end, "%H:%M")
        .context("QUIET_HOURS_END must be HH:MM")?;
    }

    parse_var("BROADCAST_BATCH_SIZE", &mut cfg.broadcast_batch_size)?;
    parse_duration("BROADCAST_DELAY_STEP", &mut cfg.broadcast_delay_step)?;
    parse_var("SEND_RATE_PER_SECOND", &mut cfg.send_rate_per_second)?;
    parse_duration("SEND_TIMEOUT", &mut cfg.send_timeout)?;
    parse_var("SEND_ATTEMPTS", &mut cfg.send_attempts)?;
    parse_duration("RETRY_BASE", &mut cfg.retry_base)?;
    parse_var("DIGEST_THRESHOLD", &mut cfg.digest_threshold)?;

    parse_var("CLAIM_RETRIES", &mut cfg.claim_retries)?;
    if let Ok(prefix) = env::var("COUPON_PREFIX") {
      cfg.coupon_prefix = prefix.trim().to_uppercase();
    }

    parse_duration("RESCUE_WINDOW", &mut cfg.rescue_window)?;
    parse_var("RESCUE_RATIO_PERCENT", &mut cfg.rescue_ratio_percent)?;
    parse_duration("RESCUE_EXTENSION", &mut cfg.rescue_extension)?;
    parse_duration("RESCUE_MAX_EXTENSION", &mut cfg.rescue_max_extension)?;
    parse_var("RESCUE_BONUS_PERCENT", &mut cfg.rescue_bonus_percent)?;
    parse_var("MAX_DISCOUNT_PERCENT", &mut cfg.max_discount_percent)?;

    parse_duration("MARKER_TTL", &mut cfg.marker_ttl)?;
    parse_var("RESCUE_SWEEP_SECS", &mut cfg.rescue_sweep_secs)?;
    parse_var("DEAL_SWEEP_SECS", &mut cfg.deal_sweep_secs)?;
    parse_var("BATCH_SWEEP_SECS", &mut cfg.batch_sweep_secs)?;

    if cfg.broadcast_batch_size == 0 {
      anyhow::bail!("BROADCAST_BATCH_SIZE must be positive");
    }
    if cfg.send_attempts == 0 {
      anyhow::bail!("SEND_ATTEMPTS must be positive");
    }

    Ok(cfg)
  }
}

fn var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
  T::Err: std::fmt::Display,
{
  match env::var(name) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map(Some)
      .map_err(|e| anyhow::anyhow!("Invalid {name}: {e}")),
    Err(_) => Ok(None),
  }
}

fn parse_var<T: FromStr>(name: &str, slot: &mut T) -> anyhow::Result<()>
where
  T::Err: std::fmt::Display,
{
  if let Some(value) = var(name)? {
    *slot = value;
  }
  Ok(())
}

fn parse_duration(name: &str, slot: &mut Duration) -> anyhow::Result<()> {
  if let Ok(raw) = env::var(name) {
    *slot = humantime::parse_duration(raw.trim())
      .with_context(|| format!("Invalid duration in {name}: '{raw}'"))?;
  }
  Ok(())
}

fn hm(hour: u32, min: u32) -> NaiveTime {
  NaiveTime::from_hms_opt(hour, min, 0).unwrap_or(NaiveTime::MIN)
}
