use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};

use crate::{
  action::Action,
  audience::AudienceFilters,
  config::DEFAULT_COUPON_PREFIX,
  entity::{DealState, MessageKind, deal, tier},
  notify::{BroadcastReport, Button, Message},
  prelude::*,
  state::AppState,
  sv::tiers::{self, NewTier},
};

const DEFAULT_COUPON_DAYS: i64 = 7;

/// Real contents of a surprise deal, hidden until someone claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surprise {
  pub title: String,
  pub product: String,
  pub discount_percent: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDeal {
  pub merchant_id: i64,
  pub title: String,
  pub product: String,
  pub discount_percent: i32,
  #[serde(default)]
  pub max_discount_value: Option<i64>,
  pub target_claims: i32,
  /// Defaults to now.
  #[serde(default)]
  pub starts_at: Option<DateTime>,
  pub expires_at: DateTime,
  /// Defaults to a week after expiry.
  #[serde(default)]
  pub coupon_valid_until: Option<DateTime>,
  #[serde(default)]
  pub coupon_prefix: Option<String>,
  #[serde(default)]
  pub tiers: Vec<NewTier>,
  #[serde(default)]
  pub surprise: Option<Surprise>,
  pub lat: f64,
  pub lng: f64,
  pub radius_km: f64,
}

fn out_of_range(msg: &str) -> Error {
  Error::OutOfRange(msg.to_string())
}

impl NewDeal {
  fn validate(&self, now: DateTime) -> Result<()> {
    if self.title.trim().is_empty() {
      return Err(out_of_range("title must not be empty"));
    }
    if self.target_claims < 1 {
      return Err(out_of_range("target_claims must be at least 1"));
    }
    if !(1..=100).contains(&self.discount_percent) {
      return Err(out_of_range("discount must be within 1..=100"));
    }
    if self.max_discount_value.is_some_and(|v| v <= 0) {
      return Err(out_of_range("max_discount_value must be positive"));
    }
    let starts_at = self.starts_at.unwrap_or(now);
    if self.expires_at <= starts_at || self.expires_at <= now {
      return Err(out_of_range("expires_at must be after the start"));
    }
    if self.coupon_valid_until.is_some_and(|v| v < self.expires_at) {
      return Err(out_of_range("coupons must stay valid until expiry"));
    }
    if self.radius_km.is_nan() || self.radius_km <= 0.0 {
      return Err(out_of_range("radius_km must be positive"));
    }
    if !(-90.0..=90.0).contains(&self.lat)
      || !(-180.0..=180.0).contains(&self.lng)
    {
      return Err(out_of_range("origin is not a valid coordinate"));
    }
    if let Some(prefix) = &self.coupon_prefix {
      let prefix = prefix.trim();
      if prefix.is_empty()
        || prefix.len() > 12
        || !prefix.bytes().all(|b| b.is_ascii_alphanumeric())
      {
        return Err(out_of_range("coupon prefix must be 1-12 alphanumerics"));
      }
    }
    if let Some(surprise) = &self.surprise
      && !(1..=100).contains(&surprise.discount_percent)
    {
      return Err(out_of_range("surprise discount must be within 1..=100"));
    }
    tiers::validate(&self.tiers)
  }
}

pub struct Deals<'a> {
  app: &'a AppState,
}

impl<'a> Deals<'a> {
  pub fn new(app: &'a AppState) -> Self {
    Self { app }
  }

  pub async fn get(&self, deal_id: i32) -> Result<deal::Model> {
    deal::Entity::find_by_id(deal_id)
      .one(&self.app.db)
      .await?
      .ok_or(Error::DealNotFound)
  }

  /// Stores the deal and its tiers; goes live at once when already started.
  pub async fn create(&self, new: NewDeal) -> Result<deal::Model> {
    let now = self.app.now();
    new.validate(now)?;

    let starts_at = new.starts_at.unwrap_or(now);
    let prefix = new
      .coupon_prefix
      .as_deref()
      .map(|p| p.trim().to_uppercase())
      .unwrap_or_else(|| {
        if self.app.config.coupon_prefix.is_empty() {
          DEFAULT_COUPON_PREFIX.to_string()
        } else {
          self.app.config.coupon_prefix.clone()
        }
      });
    let coupon_valid_until = new
      .coupon_valid_until
      .unwrap_or(new.expires_at + TimeDelta::days(DEFAULT_COUPON_DAYS));

    let txn = self.app.db.begin().await?;
    let deal = deal::ActiveModel {
      id: NotSet,
      merchant_id: Set(new.merchant_id),
      title: Set(new.title.trim().to_string()),
      product: Set(new.product.trim().to_string()),
      discount_percent: Set(new.discount_percent),
      max_discount_value: Set(new.max_discount_value),
      target_claims: Set(new.target_claims),
      current_claims: Set(0),
      starts_at: Set(starts_at),
      expires_at: Set(new.expires_at),
      original_expires_at: Set(new.expires_at),
      coupon_valid_until: Set(coupon_valid_until),
      state: Set(DealState::Scheduled),
      current_tier_level: Set(0),
      coupon_prefix: Set(prefix),
      is_surprise: Set(new.surprise.is_some()),
      hidden_title: Set(new.surprise.as_ref().map(|s| s.title.clone())),
      hidden_discount: Set(new.surprise.as_ref().map(|s| s.discount_percent)),
      hidden_product: Set(new.surprise.as_ref().map(|s| s.product.clone())),
      was_extended: Set(false),
      bonus_added: Set(false),
      origin_lat: Set(new.lat),
      origin_lng: Set(new.lng),
      radius_km: Set(new.radius_km),
      notified_count: Set(0),
      created_at: Set(now),
      activated_at: Set(None),
    }
    .insert(&txn)
    .await?;

    for (i, t) in new.tiers.iter().enumerate() {
      tier::ActiveModel {
        deal_id: Set(deal.id),
        level: Set(i as i32 + 1),
        claims_required: Set(t.claims_required),
        discount_percent: Set(t.discount_percent),
      }
      .insert(&txn)
      .await?;
    }
    txn.commit().await?;

    info!(
      deal_id = deal.id,
      merchant_id = deal.merchant_id,
      target = deal.target_claims,
      tiers = new.tiers.len(),
      surprise = deal.is_surprise,
      "deal created"
    );

    if starts_at <= now {
      self.go_live(deal.id).await?;
      return self.get(deal.id).await;
    }
    Ok(deal)
  }

  /// Opens the deal for claims and tells everyone nearby.
  pub async fn go_live(&self, deal_id: i32) -> Result<BroadcastReport> {
    let deal = {
      let _guard = self.app.deal_locks.lock(deal_id).await;
      let deal = self.get(deal_id).await?;
      match deal.state {
        DealState::Live => return Ok(BroadcastReport::default()),
        from if !from.can_transition(DealState::Live) => {
          return Err(Error::InvalidState(from));
        }
        _ => {}
      }
      deal::ActiveModel { state: Set(DealState::Live), ..deal.into() }
        .update(&self.app.db)
        .await?
    };

    let filters = AudienceFilters {
      exclude: HashSet::from([deal.merchant_id]),
      language: None,
    };
    let audience = self
      .app
      .audience
      .resolve(deal.origin_lat, deal.origin_lng, deal.radius_km, &filters)
      .await?;

    let sv = self.app.sv();
    let audience = sv.recipients.sync(&audience).await?;
    deal::Entity::update_many()
      .col_expr(
        deal::Column::NotifiedCount,
        Expr::value(audience.len() as i32),
      )
      .filter(deal::Column::Id.eq(deal_id))
      .exec(&self.app.db)
      .await?;

    let report = sv.dispatch.broadcast(&audience, &live_message(&deal)).await;
    info!(
      deal_id,
      audience = audience.len(),
      sent = report.sent,
      deferred = report.deferred,
      "deal live"
    );
    Ok(report)
  }

  /// Scheduled deals whose start has passed go live.
  pub async fn start_due(&self) -> Result<Vec<i32>> {
    let due = deal::Entity::find()
      .filter(deal::Column::State.eq(DealState::Scheduled))
      .filter(deal::Column::StartsAt.lte(self.app.now()))
      .all(&self.app.db)
      .await?;

    let mut started = Vec::new();
    for deal in due {
      match self.go_live(deal.id).await {
        Ok(_) => started.push(deal.id),
        Err(err) => error!(deal_id = deal.id, %err, "failed to start deal"),
      }
    }
    Ok(started)
  }

  /// Live deals past their expiry close without coupons.
  pub async fn expire_due(&self) -> Result<Vec<i32>> {
    let now = self.app.now();
    let due = deal::Entity::find()
      .filter(deal::Column::State.eq(DealState::Live))
      .filter(deal::Column::ExpiresAt.lte(now))
      .all(&self.app.db)
      .await?;

    let mut expired = Vec::new();
    for deal in due {
      // a rescue may have pushed the expiry out meanwhile
      let res = {
        let _guard = self.app.deal_locks.lock(deal.id).await;
        deal::Entity::update_many()
          .col_expr(deal::Column::State, Expr::value(DealState::Expired))
          .filter(deal::Column::Id.eq(deal.id))
          .filter(deal::Column::State.eq(DealState::Live))
          .filter(deal::Column::ExpiresAt.lte(now))
          .exec(&self.app.db)
          .await?
      };
      if res.rows_affected == 0 {
        continue;
      }

      info!(
        deal_id = deal.id,
        claims = deal.current_claims,
        target = deal.target_claims,
        "deal expired"
      );
      if let Err(err) = self.announce_expiry(&deal).await {
        error!(deal_id = deal.id, %err, "failed to announce expiry");
      }
      expired.push(deal.id);
    }
    Ok(expired)
  }

  async fn announce_expiry(&self, deal: &deal::Model) -> Result<()> {
    let sv = self.app.sv();
    let claims = sv.ledger.claims_for(deal.id).await?;
    let mut recipients = sv.recipients.for_claims(&claims).await?;
    recipients.push(sv.recipients.resolve(deal.merchant_id).await?);

    let text = format!(
      "😔 <b>{}</b> ended at {}/{}.\nThe target was not reached, so no \
       coupons this time.",
      deal.public_title(),
      deal.current_claims,
      deal.target_claims
    );
    let msg = Message::text(MessageKind::Expired, text).deal(deal.id);
    sv.dispatch.broadcast(&recipients, &msg).await;
    Ok(())
  }
}

fn live_message(deal: &deal::Model) -> Message {
  let text = if deal.is_surprise {
    format!(
      "🎁 <b>Mystery deal nearby!</b>\nIt unlocks when {} people claim it. \
       Ends at {} UTC.",
      deal.target_claims,
      deal.expires_at.format("%H:%M"),
    )
  } else {
    format!(
      "⚡ <b>{}</b>\n{}% off {}\nIt unlocks when {} people claim it. \
       Ends at {} UTC.",
      deal.title,
      deal.discount_percent,
      deal.product,
      deal.target_claims,
      deal.expires_at.format("%H:%M"),
    )
  };

  Message::text(MessageKind::DealLive, text).deal(deal.id).buttons(vec![
    Button::new("🙋 Claim", Action::Claim(deal.id).to_data()),
    Button::new("ℹ️ Details", Action::Info(deal.id).to_data()),
  ])
}

/// Status card for a deal, as people who have not claimed see it.
pub fn describe(deal: &deal::Model, now: DateTime) -> String {
  let status = match deal.state {
    DealState::Scheduled => {
      format!("starts at {} UTC", deal.starts_at.format("%H:%M"))
    }
    DealState::Live if deal.expires_at > now => {
      format!("{} min left", (deal.expires_at - now).num_minutes().max(1))
    }
    DealState::Live | DealState::Expired => "ended".to_string(),
    DealState::Activated => "unlocked 🎉".to_string(),
  };
  let discount = if deal.is_surprise {
    "??".to_string()
  } else {
    deal.discount_percent.to_string()
  };

  format!(
    "<b>{}</b>\n{}% off\nProgress: {}/{} ({}%)\nStatus: {}",
    deal.public_title(),
    discount,
    deal.current_claims,
    deal.target_claims,
    deal.progress_percent(),
    status,
  )
}
