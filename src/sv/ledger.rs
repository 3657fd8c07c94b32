//! The claim ledger: one atomic "claim or reject" per (deal, claimant).

use sea_orm::sea_query::Expr;
use tracing::Instrument;

use crate::{
  clock::Clock,
  config::Config,
  entity::{DealState, claim, deal},
  error::is_transient,
  prelude::*,
  sync::KeyedLocks,
};

/// Runs `op` again while it fails with a transient database error, up to
/// `retries` extra times with a growing pause. Gives up as
/// [`Error::Transient`].
pub async fn retry_transient<T, F, Fut>(retries: u32, mut op: F) -> Result<T>
where
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut attempt = 0;
  loop {
    attempt += 1;
    match op(attempt).await {
      Err(Error::Database(err)) if is_transient(&err) => {
        if attempt > retries {
          error!(attempt, %err, "gave up after transient failures");
          return Err(Error::Transient(err.to_string()));
        }
        warn!(attempt, %err, "transient failure, retrying");
        tokio::time::sleep(Duration::from_millis(10 * attempt as u64)).await;
      }
      other => return other,
    }
  }
}

#[derive(Debug, Clone)]
pub struct ClaimOutcome {
  pub claim: claim::Model,
  /// Deal as it stands right after this claim.
  pub deal: deal::Model,
  /// True only for the claim that reached the target.
  pub activated: bool,
  pub duplicate: bool,
}

pub struct Ledger<'a> {
  db: &'a DatabaseConnection,
  locks: &'a KeyedLocks<i32>,
  config: &'a Config,
  clock: &'a dyn Clock,
}

impl<'a> Ledger<'a> {
  pub fn new(
    db: &'a DatabaseConnection,
    locks: &'a KeyedLocks<i32>,
    config: &'a Config,
    clock: &'a dyn Clock,
  ) -> Self {
    Self { db, locks, config, clock }
  }

  pub async fn claim(
    &self,
    deal_id: i32,
    claimant_id: i64,
    referrer_id: Option<i64>,
  ) -> Result<ClaimOutcome> {
    if referrer_id == Some(claimant_id) {
      debug!(deal_id, claimant_id, "ignoring self referral");
    }
    let referrer_id = referrer_id.filter(|&r| r != claimant_id);

    let _guard = self.locks.lock(deal_id).await;

    let retries = self.config.claim_retries;
    retry_transient(retries, move |_| {
      self.try_claim(deal_id, claimant_id, referrer_id)
    })
    .instrument(tracing::info_span!("claim", deal_id, claimant_id))
    .await
  }

  async fn try_claim(
    &self,
    deal_id: i32,
    claimant_id: i64,
    referrer_id: Option<i64>,
  ) -> Result<ClaimOutcome> {
    let now = self.clock.now();
    let txn = self.db.begin().await?;

    let deal = deal::Entity::find_by_id(deal_id)
      .one(&txn)
      .await?
      .ok_or(Error::DealNotFound)?;

    if let Some(existing) =
      claim::Entity::find_by_id((deal_id, claimant_id)).one(&txn).await?
    {
      return Ok(ClaimOutcome {
        claim: existing,
        deal,
        activated: false,
        duplicate: true,
      });
    }

    match deal.state {
      DealState::Scheduled => return Err(Error::NotStarted),
      DealState::Expired => return Err(Error::DealExpired),
      DealState::Live | DealState::Activated if now >= deal.expires_at => {
        return Err(Error::DealExpired);
      }
      DealState::Live | DealState::Activated => {}
    }

    let position = deal.current_claims + 1;
    let claim = claim::ActiveModel {
      deal_id: Set(deal_id),
      claimant_id: Set(claimant_id),
      position: Set(position),
      coupon_code: Set(None),
      referred_by: Set(referrer_id),
      milestones_sent: Set(String::new()),
      claimed_at: Set(now),
    }
    .insert(&txn)
    .await?;

    let activated = deal.state.can_transition(DealState::Activated)
      && deal.current_claims < deal.target_claims
      && position >= deal.target_claims;

    let mut active: deal::ActiveModel = deal.into();
    active.current_claims = Set(position);
    if activated {
      active.state = Set(DealState::Activated);
      active.activated_at = Set(Some(now));
    }
    let deal = active.update(&txn).await?;
    txn.commit().await?;

    if activated {
      info!(deal_id, claimant_id, position, "deal activated");
    } else {
      debug!(deal_id, claimant_id, position, "claim recorded");
    }

    Ok(ClaimOutcome { claim, deal, activated, duplicate: false })
  }

  pub async fn get(
    &self,
    deal_id: i32,
    claimant_id: i64,
  ) -> Result<Option<claim::Model>> {
    Ok(claim::Entity::find_by_id((deal_id, claimant_id)).one(self.db).await?)
  }

  pub async fn claims_for(&self, deal_id: i32) -> Result<Vec<claim::Model>> {
    Ok(
      claim::Entity::find()
        .filter(claim::Column::DealId.eq(deal_id))
        .order_by_asc(claim::Column::Position)
        .all(self.db)
        .await?,
    )
  }

  /// Marks `milestone` on every claim up to position `upto` that has not
  /// seen it. Returns the marked claims that have not already been told
  /// about a later milestone.
  pub async fn record_milestone(
    &self,
    deal_id: i32,
    milestone: i32,
    upto: i32,
  ) -> Result<Vec<claim::Model>> {
    let _guard = self.locks.lock(deal_id).await;

    let pending: Vec<_> = self
      .claims_for(deal_id)
      .await?
      .into_iter()
      .filter(|c| c.position <= upto && !c.has_milestone(milestone))
      .collect();

    let txn = self.db.begin().await?;
    for claim in &pending {
      claim::Entity::update_many()
        .col_expr(
          claim::Column::MilestonesSent,
          Expr::value(claim.with_milestone(milestone)),
        )
        .filter(claim::Column::DealId.eq(deal_id))
        .filter(claim::Column::ClaimantId.eq(claim.claimant_id))
        .exec(&txn)
        .await?;
    }
    txn.commit().await?;

    Ok(
      pending
        .into_iter()
        .filter(|c| c.milestones().iter().all(|&m| m < milestone))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use sea_orm::{DbErr, RuntimeErr};
  use tokio_test::{assert_err, assert_ok};

  use super::*;
  use crate::sv::test_utils::{TestApp, live_deal};

  fn locked() -> Error {
    Error::Database(DbErr::Conn(RuntimeErr::Internal(
      "database is locked".into(),
    )))
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_recovers_from_lock_contention() {
    let res = retry_transient(3, |attempt| async move {
      if attempt < 3 { Err(locked()) } else { Ok(attempt) }
    })
    .await;
    assert_eq!(assert_ok!(res), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_gives_up_as_transient() {
    let calls = AtomicU32::new(0);
    let calls = &calls;
    let res = retry_transient(2, move |_| async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err::<(), _>(locked())
    })
    .await;
    let err = assert_err!(res);
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_retry_passes_through_final_errors() {
    let calls = AtomicU32::new(0);
    let calls = &calls;
    let res = retry_transient(5, move |_| async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err::<(), _>(Error::DealExpired)
    })
    .await;
    assert!(matches!(res, Err(Error::DealExpired)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_duplicate_claim_returns_first() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;

    let first = app.sv().ledger.claim(deal.id, 10, None).await.unwrap();
    let second = app.sv().ledger.claim(deal.id, 10, None).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert!(!second.activated);
    assert_eq!(first.claim.position, second.claim.position);
    assert_eq!(second.deal.current_claims, 1);
  }

  #[tokio::test]
  async fn test_claim_preconditions() {
    let app = TestApp::new().await;
    let sv = app.sv();

    assert!(matches!(
      sv.ledger.claim(999, 1, None).await,
      Err(Error::DealNotFound)
    ));

    let deal = live_deal(&app, 5).await;
    deal::ActiveModel { state: Set(DealState::Scheduled), ..deal.clone().into() }
      .update(&app.db)
      .await
      .unwrap();
    assert!(matches!(
      sv.ledger.claim(deal.id, 1, None).await,
      Err(Error::NotStarted)
    ));

    deal::ActiveModel { state: Set(DealState::Live), ..deal.clone().into() }
      .update(&app.db)
      .await
      .unwrap();
    app.clock.set(deal.expires_at);
    assert!(matches!(
      sv.ledger.claim(deal.id, 1, None).await,
      Err(Error::DealExpired)
    ));
  }

  #[tokio::test]
  async fn test_self_referral_dropped() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 5).await;

    let out = app.sv().ledger.claim(deal.id, 3, Some(3)).await.unwrap();
    assert_eq!(out.claim.referred_by, None);
    let out = app.sv().ledger.claim(deal.id, 4, Some(3)).await.unwrap();
    assert_eq!(out.claim.referred_by, Some(3));
  }

  #[tokio::test]
  async fn test_claims_after_activation_continue() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 2).await;
    let sv = app.sv();

    assert!(!sv.ledger.claim(deal.id, 1, None).await.unwrap().activated);
    assert!(sv.ledger.claim(deal.id, 2, None).await.unwrap().activated);
    let late = assert_ok!(sv.ledger.claim(deal.id, 3, None).await);
    assert!(!late.activated);
    assert_eq!(late.claim.position, 3);
    assert_eq!(late.deal.state, DealState::Activated);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_claims_positions_and_single_activation() {
    let app = TestApp::new().await;
    let deal_id = live_deal(&app, 10).await.id;

    let handles: Vec<_> = (1..=25)
      .map(|claimant| {
        let state = app.state();
        tokio::spawn(async move {
          state.sv().ledger.claim(deal_id, claimant, None).await
        })
      })
      .collect();

    let mut activations = Vec::new();
    for handle in handles {
      let out = handle.await.unwrap().unwrap();
      if out.activated {
        activations.push(out.deal.current_claims);
      }
    }
    assert_eq!(activations, vec![10]);

    let mut positions: Vec<_> = app
      .sv()
      .ledger
      .claims_for(deal_id)
      .await
      .unwrap()
      .into_iter()
      .map(|c| c.position)
      .collect();
    positions.sort();
    assert_eq!(positions, (1..=25).collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn test_record_milestone_marks_once() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 10).await;
    let sv = app.sv();
    for claimant in 1..=3 {
      sv.ledger.claim(deal.id, claimant, None).await.unwrap();
    }

    let marked = sv.ledger.record_milestone(deal.id, 25, 3).await.unwrap();
    assert_eq!(marked.len(), 3);
    let again = sv.ledger.record_milestone(deal.id, 25, 3).await.unwrap();
    assert!(again.is_empty());
    let claim = sv.ledger.get(deal.id, 1).await.unwrap().unwrap();
    assert!(claim.has_milestone(25));
  }

  #[tokio::test]
  async fn test_late_milestone_skips_newer_claims() {
    let app = TestApp::new().await;
    let deal = live_deal(&app, 4).await;
    let sv = app.sv();
    for claimant in 1..=3 {
      sv.ledger.claim(deal.id, claimant, None).await.unwrap();
    }

    // the 50% notice lands before the 25% one
    let half = sv.ledger.record_milestone(deal.id, 50, 2).await.unwrap();
    assert_eq!(half.len(), 2);
    let quarter = sv.ledger.record_milestone(deal.id, 25, 1).await.unwrap();
    assert!(quarter.is_empty());

    let first = sv.ledger.get(deal.id, 1).await.unwrap().unwrap();
    assert_eq!(first.milestones(), vec![25, 50]);
    let third = sv.ledger.get(deal.id, 3).await.unwrap().unwrap();
    assert!(third.milestones().is_empty());
  }
}
