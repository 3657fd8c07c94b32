//! Chain deals: discount levels unlocked by claim counts.

use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};

use crate::{
  entity::{MessageKind, deal, tier},
  notify::{Message, Priority},
  prelude::*,
  state::AppState,
  sv::Coupons,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTier {
  pub claims_required: i32,
  pub discount_percent: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierUnlock {
  pub level: i32,
  pub claims_required: i32,
  pub discount_percent: i32,
}

/// Thresholds strictly increase from 1, discounts never drop and stay in
/// 1..=100.
pub fn validate(tiers: &[NewTier]) -> Result<()> {
  let mut prev: Option<NewTier> = None;
  for (i, tier) in tiers.iter().enumerate() {
    let level = i + 1;
    if tier.claims_required < 1 {
      return Err(Error::OutOfRange(format!(
        "tier {level}: claims_required must be at least 1"
      )));
    }
    if !(1..=100).contains(&tier.discount_percent) {
      return Err(Error::OutOfRange(format!(
        "tier {level}: discount must be within 1..=100"
      )));
    }
    if let Some(prev) = prev {
      if tier.claims_required <= prev.claims_required {
        return Err(Error::OutOfRange(format!(
          "tier {level}: claims_required must exceed the previous tier"
        )));
      }
      if tier.discount_percent < prev.discount_percent {
        return Err(Error::OutOfRange(format!(
          "tier {level}: discount must not be lower than the previous tier"
        )));
      }
    }
    prev = Some(*tier);
  }
  Ok(())
}

pub struct Tiers<'a> {
  app: &'a AppState,
}

impl<'a> Tiers<'a> {
  pub fn new(app: &'a AppState) -> Self {
    Self { app }
  }

  pub async fn for_deal(&self, deal_id: i32) -> Result<Vec<tier::Model>> {
    Ok(
      tier::Entity::find()
        .filter(tier::Column::DealId.eq(deal_id))
        .order_by_asc(tier::Column::Level)
        .all(&self.app.db)
        .await?,
    )
  }

  /// Unlocks every qualifying level, one at a time, announcing each.
  pub async fn advance(&self, deal_id: i32) -> Result<Vec<TierUnlock>> {
    let mut unlocked = Vec::new();
    while let Some(unlock) = self.unlock_next(deal_id).await? {
      self.announce(deal_id, &unlock).await?;
      unlocked.push(unlock);
    }
    Ok(unlocked)
  }

  async fn unlock_next(&self, deal_id: i32) -> Result<Option<TierUnlock>> {
    let _guard = self.app.deal_locks.lock(deal_id).await;
    let txn = self.app.db.begin().await?;

    let deal = deal::Entity::find_by_id(deal_id)
      .one(&txn)
      .await?
      .ok_or(Error::DealNotFound)?;
    if !deal.state.is_claimable() {
      return Ok(None);
    }

    let next_level = deal.current_tier_level + 1;
    let Some(next) =
      tier::Entity::find_by_id((deal_id, next_level)).one(&txn).await?
    else {
      return Ok(None);
    };
    if deal.current_claims < next.claims_required {
      return Ok(None);
    }

    let discount = deal.effective_discount().max(next.discount_percent);
    let res = deal::Entity::update_many()
      .col_expr(deal::Column::CurrentTierLevel, Expr::value(next_level))
      .col_expr(deal::Column::DiscountPercent, Expr::value(discount))
      .filter(deal::Column::Id.eq(deal_id))
      .filter(deal::Column::CurrentTierLevel.eq(deal.current_tier_level))
      .exec(&txn)
      .await?;
    if res.rows_affected == 0 {
      return Ok(None);
    }
    let raised = Coupons::refresh_discount(&txn, deal_id, discount).await?;
    txn.commit().await?;

    info!(deal_id, level = next_level, discount, raised, "tier unlocked");
    Ok(Some(TierUnlock {
      level: next_level,
      claims_required: next.claims_required,
      discount_percent: discount,
    }))
  }

  async fn announce(&self, deal_id: i32, unlock: &TierUnlock) -> Result<()> {
    let key = format!("tier:{deal_id}:{}", unlock.level);
    let now = self.app.now();
    let ttl = self.app.config.marker_ttl;
    let broadcast = self.broadcast_unlock(deal_id, unlock);
    match self.app.once.run_once(key, ttl, now, broadcast).await {
      Some(res) => res,
      None => {
        debug!(deal_id, level = unlock.level, "tier already announced");
        Ok(())
      }
    }
  }

  async fn broadcast_unlock(
    &self,
    deal_id: i32,
    unlock: &TierUnlock,
  ) -> Result<()> {
    let sv = self.app.sv();
    let claims = sv.ledger.claims_for(deal_id).await?;
    let recipients = sv.recipients.for_claims(&claims).await?;
    let msg = Message::text(
      MessageKind::TierUnlocked,
      format!(
        "🔓 <b>Level {} unlocked!</b>\nThe discount is now {}% for everyone.",
        unlock.level, unlock.discount_percent
      ),
    )
    .deal(deal_id)
    .priority(Priority::High);

    sv.dispatch.broadcast(&recipients, &msg).await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::test_utils::{TestApp, chain_deal};

  fn tier(claims_required: i32, discount_percent: i32) -> NewTier {
    NewTier { claims_required, discount_percent }
  }

  #[test]
  fn test_validate() {
    assert!(validate(&[]).is_ok());
    assert!(validate(&[tier(5, 10), tier(10, 20)]).is_ok());
    assert!(validate(&[tier(5, 10), tier(10, 10)]).is_ok());

    for bad in [
      vec![tier(0, 10)],
      vec![tier(5, 0)],
      vec![tier(5, 101)],
      vec![tier(5, 10), tier(5, 20)],
      vec![tier(5, 20), tier(10, 10)],
    ] {
      let err = validate(&bad).unwrap_err();
      assert_eq!(err.kind(), ErrorKind::OutOfRange, "{bad:?}");
    }
  }

  #[tokio::test]
  async fn test_jump_unlocks_each_level_in_order() {
    let app = TestApp::new().await;
    let deal = chain_deal(&app, &[tier(5, 10), tier(10, 20)]).await;

    // all claims land before the engine looks at the deal
    let sv = app.sv();
    for claimant in 1..=11 {
      sv.ledger.claim(deal.id, claimant, None).await.unwrap();
    }
    let unlocked = sv.tiers.advance(deal.id).await.unwrap();

    let levels: Vec<_> =
      unlocked.iter().map(|u| (u.level, u.discount_percent)).collect();
    assert_eq!(levels, vec![(1, 10), (2, 20)]);
    let deal = sv.deals.get(deal.id).await.unwrap();
    assert_eq!(deal.current_tier_level, 2);
    assert_eq!(deal.discount_percent, 20);

    let texts = app.transport.texts_to("3");
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("Level 1"));
    assert!(texts[1].contains("Level 2"));

    // nothing left to unlock
    assert!(sv.tiers.advance(deal.id).await.unwrap().is_empty());
    assert_eq!(app.transport.texts_to("3").len(), 2);
  }

  #[tokio::test]
  async fn test_below_threshold_stays() {
    let app = TestApp::new().await;
    let deal = chain_deal(&app, &[tier(5, 10)]).await;
    let sv = app.sv();
    for claimant in 1..=4 {
      sv.ledger.claim(deal.id, claimant, None).await.unwrap();
    }
    assert!(sv.tiers.advance(deal.id).await.unwrap().is_empty());
    assert_eq!(sv.deals.get(deal.id).await.unwrap().current_tier_level, 0);
  }
}
