use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::deal;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deal_tiers")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub deal_id: i32,
  #[sea_orm(primary_key, auto_increment = false)]
  pub level: i32,
  pub claims_required: i32,
  pub discount_percent: i32,
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
