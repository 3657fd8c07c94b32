use rand::Rng;
use sea_orm::sea_query::Expr;

use crate::{
  clock::Clock,
  config::Config,
  entity::{claim, coupon, deal},
  prelude::*,
};

const CODE_LEN: usize = 6;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `{PREFIX}-{6 uppercase alphanumerics}`.
pub fn generate_code(prefix: &str) -> String {
  let mut rng = rand::thread_rng();
  let suffix: String = (0..CODE_LEN)
    .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
    .collect();
  format!("{prefix}-{suffix}")
}

pub fn is_well_formed(code: &str) -> bool {
  code.rsplit_once('-').is_some_and(|(prefix, suffix)| {
    !prefix.is_empty()
      && suffix.len() == CODE_LEN
      && suffix.bytes().all(|b| ALPHABET.contains(&b))
  })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
  pub code: String,
  /// Minted by this call rather than found on the claim.
  pub fresh: bool,
}

pub struct Coupons<'a> {
  db: &'a DatabaseConnection,
  config: &'a Config,
  clock: &'a dyn Clock,
}

impl<'a> Coupons<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    config: &'a Config,
    clock: &'a dyn Clock,
  ) -> Self {
    Self { db, config, clock }
  }

  /// Code for the claim, minted on first call.
  pub async fn issue_for(
    &self,
    deal_id: i32,
    claimant_id: i64,
  ) -> Result<String> {
    Ok(self.issue(deal_id, claimant_id).await?.code)
  }

  pub async fn issue(&self, deal_id: i32, claimant_id: i64) -> Result<Issued> {
    let claim = self.claim(deal_id, claimant_id).await?;
    if let Some(code) = claim.coupon_code {
      return Ok(Issued { code, fresh: false });
    }

    let deal = deal::Entity::find_by_id(deal_id)
      .one(self.db)
      .await?
      .ok_or(Error::DealNotFound)?;

    for attempt in 1..=self.config.coupon_code_attempts.max(1) {
      let code = generate_code(&deal.coupon_prefix);
      let txn = self.db.begin().await?;

      let taken =
        coupon::Entity::find_by_id(code.as_str()).one(&txn).await?.is_some();
      if taken {
        debug!(deal_id, attempt, "coupon code collision, regenerating");
        continue;
      }

      // whoever sets the claim's code first owns the coupon
      let set = claim::Entity::update_many()
        .col_expr(claim::Column::CouponCode, Expr::value(code.clone()))
        .filter(claim::Column::DealId.eq(deal_id))
        .filter(claim::Column::ClaimantId.eq(claimant_id))
        .filter(claim::Column::CouponCode.is_null())
        .exec(&txn)
        .await?;
      if set.rows_affected == 0 {
        txn.rollback().await?;
        let code = self
          .claim(deal_id, claimant_id)
          .await?
          .coupon_code
          .ok_or_else(|| Error::Internal("coupon code lost".into()))?;
        return Ok(Issued { code, fresh: false });
      }

      let inserted = coupon::ActiveModel {
        code: Set(code.clone()),
        deal_id: Set(deal_id),
        claimant_id: Set(claimant_id),
        merchant_id: Set(deal.merchant_id),
        discount_percent: Set(deal.effective_discount()),
        valid_until: Set(deal.coupon_valid_until),
        redeemed: Set(false),
        redeemed_at: Set(None),
        created_at: Set(self.clock.now()),
      }
      .insert(&txn)
      .await;

      match inserted {
        Ok(_) => {
          txn.commit().await?;
          info!(deal_id, claimant_id, code = %code, "coupon issued");
          return Ok(Issued { code, fresh: true });
        }
        Err(err) if crate::error::is_transient(&err) => {
          txn.rollback().await?;
          debug!(deal_id, attempt, %err, "coupon insert conflict, retrying");
        }
        Err(err) => return Err(err.into()),
      }
    }

    error!(deal_id, claimant_id, "no unique coupon code after all attempts");
    Err(Error::Transient("could not generate a unique coupon code".into()))
  }

  pub async fn redeem(
    &self,
    code: &str,
    merchant_id: i64,
  ) -> Result<coupon::Model> {
    let code = code.trim().to_uppercase();
    if !is_well_formed(&code) {
      return Err(Error::CouponNotFound);
    }
    let found = coupon::Entity::find_by_id(code.as_str())
      .one(self.db)
      .await?
      .ok_or(Error::CouponNotFound)?;

    if found.merchant_id != merchant_id {
      return Err(Redeem::WrongMerchant.into());
    }
    if found.redeemed {
      let at = found.redeemed_at.unwrap_or(found.created_at);
      return Err(Redeem::AlreadyRedeemed(at).into());
    }
    let now = self.clock.now();
    if now > found.valid_until {
      return Err(Redeem::Expired.into());
    }

    let discount = deal::Entity::find_by_id(found.deal_id)
      .one(self.db)
      .await?
      .map_or(found.discount_percent, |d| {
        d.effective_discount().max(found.discount_percent)
      });

    let res = coupon::Entity::update_many()
      .col_expr(coupon::Column::Redeemed, Expr::value(true))
      .col_expr(coupon::Column::DiscountPercent, Expr::value(discount))
      .col_expr(coupon::Column::RedeemedAt, Expr::value(Some(now)))
      .filter(coupon::Column::Code.eq(code.as_str()))
      .filter(coupon::Column::Redeemed.eq(false))
      .exec(self.db)
      .await?;

    let current = coupon::Entity::find_by_id(code.as_str())
      .one(self.db)
      .await?
      .ok_or(Error::CouponNotFound)?;

    if res.rows_affected == 0 {
      let at = current.redeemed_at.unwrap_or(now);
      return Err(Redeem::AlreadyRedeemed(at).into());
    }

    info!(
      code = %code,
      merchant_id,
      deal_id = current.deal_id,
      "coupon redeemed"
    );
    Ok(current)
  }

  /// Raises unredeemed coupons of the deal to `percent`.
  pub async fn refresh_discount<C: ConnectionTrait>(
    conn: &C,
    deal_id: i32,
    percent: i32,
  ) -> Result<u64> {
    let res = coupon::Entity::update_many()
      .col_expr(coupon::Column::DiscountPercent, Expr::value(percent))
      .filter(coupon::Column::DealId.eq(deal_id))
      .filter(coupon::Column::Redeemed.eq(false))
      .filter(coupon::Column::DiscountPercent.lt(percent))
      .exec(conn)
      .await?;
    Ok(res.rows_affected)
  }

  pub async fn for_deal(&self, deal_id: i32) -> Result<Vec<coupon::Model>> {
    Ok(
      coupon::Entity::find()
        .filter(coupon::Column::DealId.eq(deal_id))
        .all(self.db)
        .await?,
    )
  }

  async fn claim(
    &self,
    deal_id: i32,
    claimant_id: i64,
  ) -> Result<claim::Model> {
    claim::Entity::find_by_id((deal_id, claimant_id))
      .one(self.db)
      .await?
      .ok_or(Error::ClaimNotFound)
  }
}

#[cfg(test)]
mod tests {
  use futures::future;
  use tokio_test::assert_err;

  use super::*;
  use crate::sv::{
    NewTier,
    test_utils::{TestApp, chain_deal, live_deal},
  };

  #[test]
  fn test_code_shape() {
    for _ in 0..100 {
      let code = generate_code("FLASH");
      assert!(code.starts_with("FLASH-"), "{code}");
      assert!(is_well_formed(&code), "{code}");
    }
    assert!(!is_well_formed("FLASH-ab12cd"));
    assert!(!is_well_formed("FLASH-AB12"));
    assert!(!is_well_formed("AB12CD"));
  }

  #[tokio::test]
  async fn test_issue_is_idempotent_and_unique() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 50).await;
    let sv = app.sv();
    for claimant in 1..=20 {
      sv.ledger.claim(deal.id, claimant, None).await.unwrap();
    }

    let first = sv.coupons.issue_for(deal.id, 1).await.unwrap();
    let again = sv.coupons.issue_for(deal.id, 1).await.unwrap();
    assert_eq!(first, again);

    let mut codes = HashSet::new();
    for claimant in 1..=20 {
      codes.insert(sv.coupons.issue_for(deal.id, claimant).await.unwrap());
    }
    assert_eq!(codes.len(), 20);
    assert_eq!(sv.coupons.for_deal(deal.id).await.unwrap().len(), 20);
  }

  #[tokio::test]
  async fn test_concurrent_issue_mints_once() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;
    app.sv().ledger.claim(deal.id, 1, None).await.unwrap();

    let sv = app.sv();
    let issues = (0..8).map(|_| sv.coupons.issue(deal.id, 1));
    let issued = future::join_all(issues)
      .await
      .into_iter()
      .collect::<Result<Vec<_>>>()
      .unwrap();
    let codes: HashSet<_> = issued.iter().map(|i| &i.code).collect();
    assert_eq!(codes.len(), 1);
    assert_eq!(issued.iter().filter(|i| i.fresh).count(), 1);
    assert_eq!(sv.coupons.for_deal(deal.id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_issue_requires_claim() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;
    assert!(matches!(
      app.sv().coupons.issue_for(deal.id, 77).await,
      Err(Error::ClaimNotFound)
    ));
  }

  #[tokio::test]
  async fn test_redeem_once_per_merchant() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;
    let sv = app.sv();
    sv.ledger.claim(deal.id, 1, None).await.unwrap();
    let code = sv.coupons.issue_for(deal.id, 1).await.unwrap();

    let other = deal.merchant_id + 1;
    let err = assert_err!(sv.coupons.redeem(&code, other).await);
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let redeemed = sv
      .coupons
      .redeem(&code.to_lowercase(), deal.merchant_id)
      .await
      .unwrap();
    assert!(redeemed.redeemed);
    let at = redeemed.redeemed_at.unwrap();

    app.clock.advance(Duration::from_secs(60));
    let again = sv.coupons.redeem(&code, deal.merchant_id).await;
    assert!(matches!(
      again,
      Err(Error::Redeem(Redeem::AlreadyRedeemed(t))) if t == at
    ));

    let err = assert_err!(sv.coupons.redeem(&code, other).await);
    assert_eq!(err.kind(), ErrorKind::InvalidState);
  }

  #[tokio::test]
  async fn test_redeem_rejects_expired_and_unknown() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;
    let sv = app.sv();
    sv.ledger.claim(deal.id, 1, None).await.unwrap();
    let code = sv.coupons.issue_for(deal.id, 1).await.unwrap();

    assert!(matches!(
      sv.coupons.redeem("FLASH-ZZZZZZ", deal.merchant_id).await,
      Err(Error::CouponNotFound)
    ));

    app.clock.set(deal.coupon_valid_until + TimeDelta::seconds(1));
    assert!(matches!(
      sv.coupons.redeem(&code, deal.merchant_id).await,
      Err(Error::Redeem(Redeem::Expired))
    ));
  }

  #[tokio::test]
  async fn test_redeem_rejects_malformed_code() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;
    for code in ["", "pizza", "FLASH-AB12", "FLASH AB12CD"] {
      assert!(matches!(
        app.sv().coupons.redeem(code, deal.merchant_id).await,
        Err(Error::CouponNotFound)
      ));
    }
  }

  #[tokio::test]
  async fn test_coupons_follow_tier_discount() {
    let app = TestApp::new().await;
    let tiers = [NewTier { claims_required: 2, discount_percent: 30 }];
    let deal = chain_deal(&app, &tiers).await;
    let sv = app.sv();

    sv.ledger.claim(deal.id, 1, None).await.unwrap();
    let code = sv.coupons.issue_for(deal.id, 1).await.unwrap();
    let issued = sv.coupons.for_deal(deal.id).await.unwrap();
    assert_eq!(issued[0].discount_percent, 5);

    sv.ledger.claim(deal.id, 2, None).await.unwrap();
    assert_eq!(sv.tiers.advance(deal.id).await.unwrap().len(), 1);
    let raised = sv.coupons.for_deal(deal.id).await.unwrap();
    assert_eq!(raised[0].discount_percent, 30);

    let redeemed = sv.coupons.redeem(&code, deal.merchant_id).await.unwrap();
    assert_eq!(redeemed.discount_percent, 30);
  }

  #[tokio::test]
  async fn test_redeem_reads_current_deal_discount() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;
    let sv = app.sv();
    sv.ledger.claim(deal.id, 1, None).await.unwrap();
    let code = sv.coupons.issue_for(deal.id, 1).await.unwrap();

    deal::ActiveModel { discount_percent: Set(65), ..deal.clone().into() }
      .update(&app.db)
      .await
      .unwrap();

    let redeemed = sv.coupons.redeem(&code, deal.merchant_id).await.unwrap();
    assert_eq!(redeemed.discount_percent, 65);
  }
}
