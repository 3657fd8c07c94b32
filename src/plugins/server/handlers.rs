use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
  entity::{DealState, coupon, tier},
  prelude::*,
  state::AppState,
  sv::{ClaimReceipt, NewDeal, RescueAction, RescueOutcome},
};

#[derive(Serialize)]
pub struct Status {
  success: bool,
  kind: Option<&'static str>,
  msg: Option<String>,
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
  fn from(err: Error) -> Self {
    Self(err)
  }
}

impl ApiError {
  fn status(&self) -> (StatusCode, &'static str) {
    match self.0.kind() {
      ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
      ErrorKind::InvalidState => (StatusCode::CONFLICT, "invalid_state"),
      ErrorKind::AlreadyDone => (StatusCode::CONFLICT, "already_done"),
      ErrorKind::OutOfRange => (StatusCode::BAD_REQUEST, "out_of_range"),
      ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
      ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, kind) = self.status();
    if status.is_server_error() {
      error!(err = %self.0, "request failed");
    }
    let body = Status {
      success: false,
      kind: Some(kind),
      msg: Some(self.0.to_string()),
    };
    (status, Json(body)).into_response()
  }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub async fn health() -> Json<Status> {
  Json(Status { success: true, kind: None, msg: None })
}

/// A deal as anyone may see it; surprise contents stay hidden.
#[derive(Serialize)]
pub struct DealView {
  id: i32,
  title: String,
  product: Option<String>,
  discount_percent: Option<i32>,
  target_claims: i32,
  current_claims: i32,
  progress_percent: i32,
  state: DealState,
  starts_at: DateTime,
  expires_at: DateTime,
  is_surprise: bool,
  current_tier_level: i32,
  tiers: Vec<TierView>,
}

#[derive(Serialize)]
pub struct TierView {
  level: i32,
  claims_required: i32,
  discount_percent: i32,
}

impl From<tier::Model> for TierView {
  fn from(t: tier::Model) -> Self {
    Self {
      level: t.level,
      claims_required: t.claims_required,
      discount_percent: t.discount_percent,
    }
  }
}

async fn view(app: &AppState, deal_id: i32) -> Result<DealView> {
  let sv = app.sv();
  let deal = sv.deals.get(deal_id).await?;
  let tiers = sv.tiers.for_deal(deal_id).await?;
  let visible = !deal.is_surprise;

  Ok(DealView {
    id: deal.id,
    title: deal.public_title().to_string(),
    product: visible.then(|| deal.product.clone()),
    discount_percent: visible.then_some(deal.discount_percent),
    target_claims: deal.target_claims,
    current_claims: deal.current_claims,
    progress_percent: deal.progress_percent(),
    state: deal.state,
    starts_at: deal.starts_at,
    expires_at: deal.expires_at,
    is_surprise: deal.is_surprise,
    current_tier_level: deal.current_tier_level,
    tiers: tiers.into_iter().map(Into::into).collect(),
  })
}

pub async fn create_deal(
  State(app): State<Arc<AppState>>,
  Json(req): Json<NewDeal>,
) -> std::result::Result<(StatusCode, Json<DealView>), ApiError> {
  let deal = app.sv().deals.create(req).await?;
  Ok((StatusCode::CREATED, Json(view(&app, deal.id).await?)))
}

pub async fn get_deal(
  State(app): State<Arc<AppState>>,
  Path(id): Path<i32>,
) -> ApiResult<DealView> {
  Ok(Json(view(&app, id).await?))
}

#[derive(Deserialize)]
pub struct ClaimReq {
  claimant_id: i64,
  #[serde(default)]
  referrer_id: Option<i64>,
}

pub async fn claim(
  State(app): State<Arc<AppState>>,
  Path(id): Path<i32>,
  Json(req): Json<ClaimReq>,
) -> ApiResult<ClaimReceipt> {
  let receipt =
    app.sv().flash.claim(id, req.claimant_id, req.referrer_id).await?;
  Ok(Json(receipt))
}

#[derive(Deserialize)]
pub struct RescueReq {
  merchant_id: i64,
  action: String,
}

pub async fn rescue(
  State(app): State<Arc<AppState>>,
  Path(id): Path<i32>,
  Json(req): Json<RescueReq>,
) -> ApiResult<RescueOutcome> {
  let action: RescueAction = req.action.trim().parse()?;
  Ok(Json(app.sv().rescue.apply(id, req.merchant_id, action).await?))
}

#[derive(Deserialize)]
pub struct RedeemReq {
  code: String,
  merchant_id: i64,
}

pub async fn redeem(
  State(app): State<Arc<AppState>>,
  Json(req): Json<RedeemReq>,
) -> ApiResult<coupon::Model> {
  Ok(Json(app.sv().coupons.redeem(&req.code, req.merchant_id).await?))
}
