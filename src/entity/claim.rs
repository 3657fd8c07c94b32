use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::deal;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "claims")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub deal_id: i32,
  #[sea_orm(primary_key, auto_increment = false)]
  pub claimant_id: i64,
  pub position: i32,
  pub coupon_code: Option<String>,
  pub referred_by: Option<i64>,
  /// Comma separated milestone percentages already delivered.
  pub milestones_sent: String,
  pub claimed_at: DateTime,
}

impl Model {
  pub fn milestones(&self) -> Vec<i32> {
    self
      .milestones_sent
      .split(',')
      .filter_map(|m| m.trim().parse().ok())
      .collect()
  }

  pub fn has_milestone(&self, milestone: i32) -> bool {
    self.milestones().contains(&milestone)
  }

  /// Marker string with `milestone` appended, kept sorted and unique.
  pub fn with_milestone(&self, milestone: i32) -> String {
    let mut all = self.milestones();
    if !all.contains(&milestone) {
      all.push(milestone);
    }
    all.sort_unstable();
    all.iter().map(i32::to_string).collect::<Vec<_>>().join(",")
  }
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
