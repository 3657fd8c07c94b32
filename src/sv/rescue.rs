//! Last-minute rescue offers for deals that are close but running out of
//! time.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
  action::Action,
  config::Config,
  entity::{DealState, MessageKind, deal},
  notify::{Button, Message, Priority},
  prelude::*,
  state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescueAction {
  Extend,
  Bonus,
  Both,
  Expire,
}

impl RescueAction {
  pub fn as_str(self) -> &'static str {
    match self {
      RescueAction::Extend => "extend",
      RescueAction::Bonus => "bonus",
      RescueAction::Both => "both",
      RescueAction::Expire => "expire",
    }
  }

  fn extends(self) -> bool {
    matches!(self, RescueAction::Extend | RescueAction::Both)
  }

  fn adds_bonus(self) -> bool {
    matches!(self, RescueAction::Bonus | RescueAction::Both)
  }
}

impl FromStr for RescueAction {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "extend" => Ok(RescueAction::Extend),
      "bonus" => Ok(RescueAction::Bonus),
      "both" => Ok(RescueAction::Both),
      "expire" => Ok(RescueAction::Expire),
      other => {
        Err(Error::OutOfRange(format!("unknown rescue action `{other}`")))
      }
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RescueOutcome {
  pub deal: deal::Model,
  pub action: RescueAction,
  pub extended: bool,
  pub bonus_added: bool,
}

impl RescueOutcome {
  pub fn changed(&self) -> bool {
    self.extended || self.bonus_added
  }
}

/// Live, inside the final window, and at or above the ratio but short of
/// the target.
pub fn is_eligible(deal: &deal::Model, now: DateTime, config: &Config) -> bool {
  let window =
    TimeDelta::from_std(config.rescue_window).unwrap_or(TimeDelta::zero());
  let remaining = deal.expires_at - now;

  deal.state == DealState::Live
    && remaining > TimeDelta::zero()
    && remaining <= window
    && deal.current_claims < deal.target_claims
    && deal.current_claims as i64 * 100
      >= deal.target_claims as i64 * config.rescue_ratio_percent as i64
}

pub struct Rescue<'a> {
  app: &'a AppState,
}

impl<'a> Rescue<'a> {
  pub fn new(app: &'a AppState) -> Self {
    Self { app }
  }

  /// Offers a rescue to the owner of every eligible deal, once per deal.
  pub async fn sweep(&self) -> Result<Vec<i32>> {
    let config = &self.app.config;
    let now = self.app.now();
    let horizon = now
      + TimeDelta::from_std(config.rescue_window).unwrap_or(TimeDelta::zero());

    let candidates = deal::Entity::find()
      .filter(deal::Column::State.eq(DealState::Live))
      .filter(deal::Column::ExpiresAt.gt(now))
      .filter(deal::Column::ExpiresAt.lte(horizon))
      .all(&self.app.db)
      .await?;

    let mut offered = Vec::new();
    for deal in candidates.iter().filter(|d| is_eligible(d, now, config)) {
      let key = format!("rescue:{}", deal.id);
      let offer = self.offer(deal, now);
      let ttl = config.marker_ttl;
      match self.app.once.run_once(key, ttl, now, offer).await {
        None => continue,
        Some(res) => res?,
      }
      offered.push(deal.id);
    }

    if !offered.is_empty() {
      info!(deals = ?offered, "rescue offers sent");
    }
    Ok(offered)
  }

  async fn offer(&self, deal: &deal::Model, now: DateTime) -> Result<()> {
    let config = &self.app.config;
    let minutes_left = (deal.expires_at - now).num_minutes().max(1);
    let extension = config.rescue_extension.as_secs() / 60;

    let text = format!(
      "⏰ <b>{}</b> is at {}% ({}/{}) with {} min left.\nRescue it?",
      deal.title,
      deal.progress_percent(),
      deal.current_claims,
      deal.target_claims,
      minutes_left,
    );
    let buttons = vec![
      Button::new(
        format!("➕ Extend {extension} min"),
        Action::Rescue(RescueAction::Extend, deal.id).to_data(),
      ),
      Button::new(
        format!("💸 +{}% discount", config.rescue_bonus_percent),
        Action::Rescue(RescueAction::Bonus, deal.id).to_data(),
      ),
      Button::new(
        "🚀 Both",
        Action::Rescue(RescueAction::Both, deal.id).to_data(),
      ),
      Button::new(
        "⌛ Let it expire",
        Action::Rescue(RescueAction::Expire, deal.id).to_data(),
      ),
    ];

    let sv = self.app.sv();
    let owner = sv.recipients.resolve(deal.merchant_id).await?;
    let msg = Message::text(MessageKind::RescueOffer, text)
      .deal(deal.id)
      .priority(Priority::High)
      .buttons(buttons);
    sv.dispatch.notify(&owner, &msg).await;
    Ok(())
  }

  pub async fn apply(
    &self,
    deal_id: i32,
    merchant_id: i64,
    action: RescueAction,
  ) -> Result<RescueOutcome> {
    let outcome = self.update(deal_id, merchant_id, action).await?;

    if action == RescueAction::Expire {
      info!(deal_id, merchant_id, "owner declined the rescue");
    }
    if outcome.changed() {
      self.announce(&outcome).await?;
    }
    Ok(outcome)
  }

  async fn update(
    &self,
    deal_id: i32,
    merchant_id: i64,
    action: RescueAction,
  ) -> Result<RescueOutcome> {
    let config = &self.app.config;
    let _guard = self.app.deal_locks.lock(deal_id).await;
    let now = self.app.now();
    let txn = self.app.db.begin().await?;

    let deal = deal::Entity::find_by_id(deal_id)
      .one(&txn)
      .await?
      .ok_or(Error::DealNotFound)?;
    if deal.merchant_id != merchant_id {
      return Err(Error::NotOwner);
    }
    if deal.state != DealState::Live {
      return Err(Error::InvalidState(deal.state));
    }
    if now >= deal.expires_at {
      return Err(Error::DealExpired);
    }

    let extended = action.extends() && !deal.was_extended;
    let bonus_added = action.adds_bonus() && !deal.bonus_added;
    if !extended && !bonus_added {
      return Ok(RescueOutcome { deal, action, extended, bonus_added });
    }

    let mut active: deal::ActiveModel = deal.clone().into();
    if extended {
      let step = TimeDelta::from_std(config.rescue_extension)
        .unwrap_or(TimeDelta::zero());
      let cap = deal.original_expires_at
        + TimeDelta::from_std(config.rescue_max_extension)
          .unwrap_or(TimeDelta::zero());
      let expires_at = (deal.expires_at + step).min(cap).max(deal.expires_at);
      active.expires_at = Set(expires_at);
      active.was_extended = Set(true);
    }
    if bonus_added {
      let base = deal.effective_discount();
      let discount = (base + config.rescue_bonus_percent)
        .min(config.max_discount_percent)
        .max(base);
      active.discount_percent = Set(discount);
      active.bonus_added = Set(true);
    }
    let deal = active.update(&txn).await?;
    txn.commit().await?;

    info!(
      deal_id,
      action = action.as_str(),
      extended,
      bonus_added,
      expires_at = %deal.expires_at,
      discount = deal.discount_percent,
      "rescue applied"
    );
    Ok(RescueOutcome { deal, action, extended, bonus_added })
  }

  async fn announce(&self, outcome: &RescueOutcome) -> Result<()> {
    let deal = &outcome.deal;
    let mut parts = Vec::new();
    if outcome.extended {
      let minutes = (deal.expires_at - self.app.now()).num_minutes();
      parts.push(format!("{minutes} min left now"));
    }
    if outcome.bonus_added {
      parts.push(format!("discount raised to {}%", deal.discount_percent));
    }
    let text = format!(
      "🛟 <b>{}</b> got a boost: {}.\n{} more people needed!",
      deal.public_title(),
      parts.join(", "),
      deal.target_claims - deal.current_claims,
    );

    let sv = self.app.sv();
    let claims = sv.ledger.claims_for(deal.id).await?;
    let mut recipients = sv.recipients.for_claims(&claims).await?;
    if !claims.iter().any(|c| c.claimant_id == deal.merchant_id) {
      recipients.push(sv.recipients.resolve(deal.merchant_id).await?);
    }

    let msg = Message::text(MessageKind::RescueApplied, text)
      .deal(deal.id)
      .priority(Priority::High);
    sv.dispatch.broadcast(&recipients, &msg).await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::test_utils::{MERCHANT, TestApp, live_deal};

  async fn nearly_there(app: &TestApp) -> deal::Model {
    // 8 of 10 claimed with 4 minutes to go
    let deal = live_deal(app, 10).await;
    for claimant in 1..=8 {
      app.sv().ledger.claim(deal.id, claimant, None).await.unwrap();
    }
    app.clock.set(deal.expires_at - TimeDelta::minutes(4));
    app.sv().deals.get(deal.id).await.unwrap()
  }

  #[test]
  fn test_action_parse() {
    assert_eq!("both".parse::<RescueAction>().unwrap(), RescueAction::Both);
    let err = "later".parse::<RescueAction>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfRange);
  }

  #[tokio::test]
  async fn test_eligibility() {
    let app = TestApp::new().await;
    let deal = nearly_there(&app).await;
    let now = app.now();
    assert!(is_eligible(&deal, now, &app.config));

    let early = now - TimeDelta::minutes(10);
    assert!(!is_eligible(&deal, early, &app.config));
    assert!(!is_eligible(&deal, deal.expires_at, &app.config));

    let short = deal::Model { current_claims: 7, ..deal };
    assert!(!is_eligible(&short, now, &app.config));
  }

  #[tokio::test]
  async fn test_sweep_offers_once() {
    let app = TestApp::new().await;
    let deal = nearly_there(&app).await;
    let owner = MERCHANT.to_string();

    assert_eq!(app.sv().rescue.sweep().await.unwrap(), vec![deal.id]);
    assert!(app.sv().rescue.sweep().await.unwrap().is_empty());

    let offers = app.transport.texts_to(&owner);
    assert_eq!(offers.len(), 1);
    assert!(offers[0].contains("Rescue it?"));
    assert_eq!(
      app.transport.buttons_to(&owner),
      vec![
        format!("rescue_extend_{}", deal.id),
        format!("rescue_bonus_{}", deal.id),
        format!("rescue_both_{}", deal.id),
        format!("rescue_expire_{}", deal.id),
      ]
    );
  }

  #[tokio::test]
  async fn test_apply_both_broadcasts_once() {
    let app = TestApp::new().await;
    let deal = nearly_there(&app).await;

    let out = app
      .sv()
      .rescue
      .apply(deal.id, MERCHANT, RescueAction::Both)
      .await
      .unwrap();
    assert!(out.extended && out.bonus_added);
    assert_eq!(out.deal.expires_at, deal.expires_at + TimeDelta::minutes(15));
    assert_eq!(out.deal.discount_percent, deal.discount_percent + 5);

    for claimant in 1..=8 {
      assert_eq!(app.transport.texts_to(&claimant.to_string()).len(), 1);
    }
    assert_eq!(app.transport.texts_to(&MERCHANT.to_string()).len(), 1);
  }

  #[tokio::test]
  async fn test_extend_twice_is_noop() {
    let app = TestApp::new().await;
    let deal = nearly_there(&app).await;
    let sv = app.sv();

    let once = sv
      .rescue
      .apply(deal.id, MERCHANT, RescueAction::Extend)
      .await
      .unwrap();
    let twice = sv
      .rescue
      .apply(deal.id, MERCHANT, RescueAction::Extend)
      .await
      .unwrap();
    assert!(!twice.changed());
    assert_eq!(once.deal.expires_at, twice.deal.expires_at);
    assert_eq!(app.transport.texts_to("1").len(), 1);
  }

  #[tokio::test]
  async fn test_apply_guards() {
    let app = TestApp::new().await;
    let deal = nearly_there(&app).await;
    let sv = app.sv();

    assert!(matches!(
      sv.rescue.apply(deal.id, MERCHANT + 1, RescueAction::Both).await,
      Err(Error::NotOwner)
    ));

    let out = sv
      .rescue
      .apply(deal.id, MERCHANT, RescueAction::Expire)
      .await
      .unwrap();
    assert!(!out.changed());

    app.clock.set(deal.expires_at);
    let err = sv
      .rescue
      .apply(deal.id, MERCHANT, RescueAction::Extend)
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
  }

  #[tokio::test]
  async fn test_bonus_capped() {
    let app = TestApp::new().await;
    let deal = nearly_there(&app).await;
    deal::ActiveModel { discount_percent: Set(88), ..deal.clone().into() }
      .update(&app.db)
      .await
      .unwrap();

    let out = app
      .sv()
      .rescue
      .apply(deal.id, MERCHANT, RescueAction::Bonus)
      .await
      .unwrap();
    assert_eq!(out.deal.discount_percent, app.config.max_discount_percent);
  }
}
