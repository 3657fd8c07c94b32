//! The claim flow as a claimant sees it: claim, coupon, unlocks and
//! progress notices in one call.

use serde::Serialize;

use crate::{
  entity::{DealState, MessageKind, deal},
  notify::Message,
  prelude::*,
  state::AppState,
  sv::TierUnlock,
};

/// Progress percentages that trigger a notice before activation.
pub const MILESTONES: [i32; 4] = [25, 50, 75, 90];

/// Milestones passed when the count moves from `before` to `after`.
pub fn crossed_milestones(before: i32, after: i32, target: i32) -> Vec<i32> {
  if target <= 0 || after >= target {
    return Vec::new();
  }
  let pct = |n: i32| (n as i64 * 100 / target as i64) as i32;
  let (from, to) = (pct(before), pct(after));
  MILESTONES.into_iter().filter(|&m| from < m && m <= to).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reveal {
  pub title: String,
  pub product: String,
  pub discount_percent: i32,
}

impl Reveal {
  fn of(deal: &deal::Model) -> Option<Self> {
    deal.is_surprise.then(|| Reveal {
      title: deal.hidden_title.clone().unwrap_or_else(|| deal.title.clone()),
      product: deal
        .hidden_product
        .clone()
        .unwrap_or_else(|| deal.product.clone()),
      discount_percent: deal.effective_discount(),
    })
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
  pub deal_id: i32,
  pub claimant_id: i64,
  pub position: i32,
  pub current_claims: i32,
  pub target_claims: i32,
  pub state: DealState,
  pub activated: bool,
  pub duplicate: bool,
  pub coupon_code: Option<String>,
  pub reveal: Option<Reveal>,
  pub tiers_unlocked: Vec<TierUnlock>,
}

pub struct Flash<'a> {
  app: &'a AppState,
}

impl<'a> Flash<'a> {
  pub fn new(app: &'a AppState) -> Self {
    Self { app }
  }

  /// Records the claim, then runs every follow-up. Follow-up failures are
  /// logged; the claim itself stands.
  pub async fn claim(
    &self,
    deal_id: i32,
    claimant_id: i64,
    referrer_id: Option<i64>,
  ) -> Result<ClaimReceipt> {
    let sv = self.app.sv();
    sv.recipients.get_or_create(claimant_id).await?;

    let out = sv.ledger.claim(deal_id, claimant_id, referrer_id).await?;
    let deal = &out.deal;
    let mut coupon_code = out.claim.coupon_code.clone();
    let mut tiers_unlocked = Vec::new();

    if !out.duplicate {
      if out.activated {
        if let Err(err) = sv.activation.activate(deal_id).await {
          error!(deal_id, %err, "activation failed, repair sweep will retry");
        }
        coupon_code = sv
          .ledger
          .get(deal_id, claimant_id)
          .await?
          .and_then(|c| c.coupon_code);
      } else if deal.state == DealState::Activated {
        match sv.activation.late_joiner(deal, claimant_id).await {
          Ok(code) => coupon_code = Some(code),
          Err(err) => {
            error!(deal_id, claimant_id, %err, "late joiner coupon failed")
          }
        }
      }

      match sv.tiers.advance(deal_id).await {
        Ok(unlocked) => tiers_unlocked = unlocked,
        Err(err) => error!(deal_id, %err, "tier advance failed"),
      }

      if deal.state == DealState::Live
        && let Err(err) = self.milestones(deal, out.claim.position).await
      {
        error!(deal_id, %err, "milestone notices failed");
      }

      if let Some(referrer) = out.claim.referred_by
        && let Err(err) = self.thank_referrer(deal, referrer).await
      {
        error!(deal_id, referrer, %err, "referral notice failed");
      }
    }

    Ok(ClaimReceipt {
      deal_id,
      claimant_id,
      position: out.claim.position,
      current_claims: deal.current_claims,
      target_claims: deal.target_claims,
      state: deal.state,
      activated: out.activated,
      duplicate: out.duplicate,
      coupon_code,
      reveal: Reveal::of(deal),
      tiers_unlocked,
    })
  }

  async fn milestones(&self, deal: &deal::Model, position: i32) -> Result<()> {
    let sv = self.app.sv();
    let crossed = crossed_milestones(position - 1, position, deal.target_claims);
    for milestone in crossed {
      let claims =
        sv.ledger.record_milestone(deal.id, milestone, position).await?;
      if claims.is_empty() {
        continue;
      }
      let current = sv.deals.get(deal.id).await?;
      if current.state != DealState::Live {
        continue;
      }

      let recipients = sv.recipients.for_claims(&claims).await?;
      let text = format!(
        "📈 <b>{}</b> is {}% there!\n{} more to unlock it.",
        current.public_title(),
        milestone,
        (current.target_claims - current.current_claims).max(0),
      );
      let msg = Message::text(MessageKind::Milestone, text).deal(deal.id);
      sv.dispatch.broadcast(&recipients, &msg).await;
    }
    Ok(())
  }

  async fn thank_referrer(
    &self,
    deal: &deal::Model,
    referrer: i64,
  ) -> Result<()> {
    let sv = self.app.sv();
    if sv.ledger.get(deal.id, referrer).await?.is_none() {
      return Ok(());
    }

    let to = sv.recipients.resolve(referrer).await?;
    let text = format!(
      "🤝 A friend joined <b>{}</b> through you!\nNow at {}/{}.",
      deal.public_title(),
      deal.current_claims,
      deal.target_claims,
    );
    let msg = Message::text(MessageKind::Referral, text).deal(deal.id);
    sv.dispatch.notify(&to, &msg).await;
    Ok(())
  }
}
