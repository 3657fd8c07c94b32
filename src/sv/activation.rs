//! What happens once a deal reaches its target.

use chrono::FixedOffset;
use serde::Serialize;

use crate::{
  entity::{DealState, MessageKind, claim, deal},
  notify::{Message, Priority, Recipient},
  prelude::*,
  state::AppState,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivationSummary {
  pub total_claims: usize,
  pub notified: i32,
  /// Claims per hundred people notified.
  pub claim_rate_percent: Option<f64>,
  /// Local hour with the most claims.
  pub peak_hour: Option<u32>,
  pub claims_per_hour: f64,
}

impl ActivationSummary {
  pub fn compute(
    deal: &deal::Model,
    claims: &[claim::Model],
    offset: FixedOffset,
  ) -> Self {
    let total_claims = claims.len();

    let claim_rate_percent = (deal.notified_count > 0)
      .then(|| total_claims as f64 * 100.0 / deal.notified_count as f64);

    let mut per_hour = [0usize; 24];
    for claim in claims {
      let local = claim.claimed_at + offset;
      per_hour[local.hour() as usize] += 1;
    }
    let peak_hour = per_hour
      .iter()
      .enumerate()
      .filter(|&(_, &n)| n > 0)
      // ties go to the earlier hour
      .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
      .map(|(hour, _)| hour as u32);

    let end = deal
      .activated_at
      .or_else(|| claims.iter().map(|c| c.claimed_at).max())
      .unwrap_or(deal.starts_at);
    let hours = (end - deal.starts_at).num_seconds().max(60) as f64 / 3600.0;

    Self {
      total_claims,
      notified: deal.notified_count,
      claim_rate_percent,
      peak_hour,
      claims_per_hour: total_claims as f64 / hours,
    }
  }

  pub fn render(&self, deal: &deal::Model) -> String {
    let mut text = format!(
      "📊 <b>{}</b> unlocked!\nClaims: {}\nNotified: {}",
      deal.title, self.total_claims, self.notified
    );
    if let Some(rate) = self.claim_rate_percent {
      text += &format!("\nClaim rate: {rate:.1}%");
    }
    if let Some(hour) = self.peak_hour {
      text += &format!("\nPeak hour: {hour:02}:00");
    }
    text += &format!("\nVelocity: {:.1} claims/hour", self.claims_per_hour);
    text
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
  pub coupons_issued: usize,
  pub summary: ActivationSummary,
}

pub struct Activation<'a> {
  app: &'a AppState,
}

impl<'a> Activation<'a> {
  pub fn new(app: &'a AppState) -> Self {
    Self { app }
  }

  /// Issues every missing coupon, congratulates each newly covered claimant
  /// and sends the owner one summary. Safe to run again.
  pub async fn activate(&self, deal_id: i32) -> Result<ActivationReport> {
    let sv = self.app.sv();
    let deal = sv.deals.get(deal_id).await?;
    if deal.state != DealState::Activated {
      return Err(Error::InvalidState(deal.state));
    }

    let claims = sv.ledger.claims_for(deal_id).await?;
    let recipients = sv.recipients.for_claims(&claims).await?;

    let mut coupons_issued = 0;
    for to in &recipients {
      let issued = sv.coupons.issue(deal_id, to.id).await?;
      if issued.fresh {
        coupons_issued += 1;
        self.celebrate(&deal, to, &issued.code).await;
      }
    }

    let summary =
      ActivationSummary::compute(&deal, &claims, self.app.config.utc_offset);
    let key = format!("activation:{deal_id}");
    let now = self.app.now();
    let ttl = self.app.config.marker_ttl;
    let summarize = self.summarize(&deal, &summary);
    let sent = self.app.once.run_once(key, ttl, now, summarize).await;
    if let Some(Err(err)) = sent {
      return Err(err);
    }

    info!(
      deal_id,
      coupons_issued,
      claims = claims.len(),
      "activation processed"
    );
    Ok(ActivationReport { coupons_issued, summary })
  }

  /// Finishes activations that were interrupted before every claim had a
  /// coupon.
  pub async fn repair(&self) -> Result<usize> {
    let deal_ids: Vec<i32> = claim::Entity::find()
      .select_only()
      .column(claim::Column::DealId)
      .distinct()
      .inner_join(deal::Entity)
      .filter(claim::Column::CouponCode.is_null())
      .filter(deal::Column::State.eq(DealState::Activated))
      .into_tuple()
      .all(&self.app.db)
      .await?;

    let mut issued = 0;
    for deal_id in deal_ids {
      warn!(deal_id, "activated deal has claims without coupons");
      issued += self.activate(deal_id).await?.coupons_issued;
    }
    Ok(issued)
  }

  /// Coupon for a claim made after activation.
  pub async fn late_joiner(
    &self,
    deal: &deal::Model,
    claimant_id: i64,
  ) -> Result<String> {
    let sv = self.app.sv();
    let issued = sv.coupons.issue(deal.id, claimant_id).await?;
    if issued.fresh {
      let to = sv.recipients.resolve(claimant_id).await?;
      self.celebrate(deal, &to, &issued.code).await;
    }
    Ok(issued.code)
  }

  async fn summarize(
    &self,
    deal: &deal::Model,
    summary: &ActivationSummary,
  ) -> Result<()> {
    let sv = self.app.sv();
    let owner = sv.recipients.resolve(deal.merchant_id).await?;
    let msg = Message::text(MessageKind::ActivationSummary, summary.render(deal))
      .deal(deal.id)
      .priority(Priority::High);
    sv.dispatch.notify(&owner, &msg).await;
    Ok(())
  }

  async fn celebrate(&self, deal: &deal::Model, to: &Recipient, code: &str) {
    let text = format!(
      "🎉 <b>{}</b> is unlocked!\nYour coupon: <code>{}</code>\n{}% off, \
       valid until {}.",
      deal.hidden_title.as_deref().unwrap_or(&deal.title),
      code,
      deal.effective_discount(),
      deal.coupon_valid_until.format("%Y-%m-%d %H:%M"),
    );
    let msg = Message::text(MessageKind::Celebration, text)
      .deal(deal.id)
      .priority(Priority::FlashCritical);
    self.app.sv().dispatch.notify(to, &msg).await;
  }
}

#[cfg(test)]
mod tests {
  use chrono::Offset;

  use super::*;
  use crate::sv::{
    Surprise,
    test_utils::{MERCHANT, TestApp, deal_model, live_deal, new_deal},
  };

  #[test]
  fn test_summary_stats() {
    let start = chrono::NaiveDate::from_ymd_opt(2026, 10, 18)
      .unwrap()
      .and_hms_opt(10, 0, 0)
      .unwrap();
    let deal = deal::Model {
      starts_at: start,
      activated_at: Some(start + TimeDelta::hours(2)),
      notified_count: 40,
      ..deal_model(start)
    };
    let claim = |minutes: i64| claim::Model {
      deal_id: 1,
      claimant_id: minutes,
      position: 1,
      coupon_code: None,
      referred_by: None,
      milestones_sent: String::new(),
      claimed_at: start + TimeDelta::minutes(minutes),
    };
    let claims: Vec<_> = [5, 70, 80, 90, 110].into_iter().map(claim).collect();

    let summary = ActivationSummary::compute(&deal, &claims, Utc.fix());
    assert_eq!(summary.total_claims, 5);
    assert_eq!(summary.claim_rate_percent, Some(12.5));
    assert_eq!(summary.peak_hour, Some(11));
    assert!((summary.claims_per_hour - 2.5).abs() < 1e-9);

    let east = FixedOffset::east_opt(3 * 3600).unwrap();
    let summary = ActivationSummary::compute(&deal, &claims, east);
    assert_eq!(summary.peak_hour, Some(14));
  }

  #[tokio::test]
  async fn test_activation_is_idempotent() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 3).await;
    for claimant in 1..=3 {
      app.sv().ledger.claim(deal.id, claimant, None).await.unwrap();
    }

    let first = app.sv().activation.activate(deal.id).await.unwrap();
    assert_eq!(first.coupons_issued, 3);
    let second = app.sv().activation.activate(deal.id).await.unwrap();
    assert_eq!(second.coupons_issued, 0);

    assert_eq!(app.sv().coupons.for_deal(deal.id).await.unwrap().len(), 3);
    for claimant in 1..=3 {
      let texts = app.transport.texts_to(&claimant.to_string());
      assert_eq!(texts.len(), 1);
      assert!(texts[0].contains("Your coupon"));
    }
    let owner = app.transport.texts_to(&MERCHANT.to_string());
    assert_eq!(owner.len(), 1);
    assert!(owner[0].contains("Claims: 3"));
  }

  #[tokio::test]
  async fn test_repair_fills_missing_coupons() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 2).await;
    for claimant in 1..=2 {
      app.sv().ledger.claim(deal.id, claimant, None).await.unwrap();
    }
    // the claim that activated never reached the activation step
    assert_eq!(app.sv().activation.repair().await.unwrap(), 2);
    assert_eq!(app.sv().activation.repair().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_activate_requires_activated_state() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 3).await;
    assert!(matches!(
      app.sv().activation.activate(deal.id).await,
      Err(Error::InvalidState(DealState::Live))
    ));
  }

  #[tokio::test]
  async fn test_surprise_coupon_carries_hidden_discount() {
    let app = TestApp::new().await;
    let mut new = new_deal(app.now());
    new.target_claims = 1;
    new.surprise = Some(Surprise {
      title: "Secret Sushi".into(),
      product: "omakase".into(),
      discount_percent: 70,
    });
    let deal = app.sv().deals.create(new).await.unwrap();
    assert_eq!(deal.discount_percent, 50);

    app.sv().flash.claim(deal.id, 1, None).await.unwrap();

    let texts = app.transport.texts_to("1");
    let celebration = texts.iter().find(|t| t.contains("Your coupon")).unwrap();
    assert!(celebration.contains("70% off"), "{celebration}");
    let coupons = app.sv().coupons.for_deal(deal.id).await.unwrap();
    assert_eq!(coupons[0].discount_percent, 70);
  }
}
