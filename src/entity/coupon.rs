use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::deal;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub code: String,
  pub deal_id: i32,
  pub claimant_id: i64,
  pub merchant_id: i64,
  pub discount_percent: i32,
  pub valid_until: DateTime,
  pub redeemed: bool,
  pub redeemed_at: Option<DateTime>,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "deal::Entity",
    from = "Column::DealId",
    to = "deal::Column::Id"
  )]
  Deal,
}

impl Related<deal::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Deal.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
