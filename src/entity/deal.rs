use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{claim, tier};

/// Deal lifecycle. Transitions only move forward:
/// `Scheduled -> Live -> Activated` and `Live -> Expired`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum DealState {
  #[sea_orm(string_value = "scheduled")]
  #[default]
  Scheduled,
  #[sea_orm(string_value = "live")]
  Live,
  #[sea_orm(string_value = "activated")]
  Activated,
  #[sea_orm(string_value = "expired")]
  Expired,
}

impl DealState {
  pub fn can_transition(self, to: DealState) -> bool {
    matches!(
      (self, to),
      (DealState::Scheduled, DealState::Live)
        | (DealState::Live, DealState::Activated)
        | (DealState::Live, DealState::Expired)
    )
  }

  pub fn is_claimable(self) -> bool {
    matches!(self, DealState::Live | DealState::Activated)
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deals")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub merchant_id: i64,
  pub title: String,
  pub product: String,
  pub discount_percent: i32,
  pub max_discount_value: Option<i64>,
  pub target_claims: i32,
  pub current_claims: i32,
  pub starts_at: DateTime,
  pub expires_at: DateTime,
  pub original_expires_at: DateTime,
  pub coupon_valid_until: DateTime,
  pub state: DealState,
  pub current_tier_level: i32,
  pub coupon_prefix: String,
  pub is_surprise: bool,
  pub hidden_title: Option<String>,
  pub hidden_discount: Option<i32>,
  pub hidden_product: Option<String>,
  pub was_extended: bool,
  pub bonus_added: bool,
  #[sea_orm(column_type = "Double")]
  pub origin_lat: f64,
  #[sea_orm(column_type = "Double")]
  pub origin_lng: f64,
  #[sea_orm(column_type = "Double")]
  pub radius_km: f64,
  pub notified_count: i32,
  pub created_at: DateTime,
  pub activated_at: Option<DateTime>,
}

impl Model {
  /// Integer percentage of the target reached, saturating at 100.
  pub fn progress_percent(&self) -> i32 {
    if self.target_claims <= 0 {
      return 100;
    }
    ((self.current_claims as i64 * 100) / self.target_claims as i64).min(100)
      as i32
  }

  /// Discount a coupon for this deal is worth. Surprise deals carry their
  /// hidden figure until a tier or bonus pushes the public one past it.
  pub fn effective_discount(&self) -> i32 {
    match self.hidden_discount {
      Some(hidden) if self.is_surprise => hidden.max(self.discount_percent),
      _ => self.discount_percent,
    }
  }

  /// Title shown to people who have not claimed yet.
  pub fn public_title(&self) -> &str {
    if self.is_surprise { "🎁 Mystery deal" } else { &self.title }
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "claim::Entity")]
  Claims,
  #[sea_orm(has_many = "tier::Entity")]
  Tiers,
}

impl Related<claim::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Claims.def()
  }
}

impl Related<tier::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Tiers.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
  use super::DealState::*;

  #[test]
  fn test_state_machine_is_forward_only() {
    assert!(Scheduled.can_transition(Live));
    assert!(Live.can_transition(Activated));
    assert!(Live.can_transition(Expired));

    assert!(!Activated.can_transition(Live));
    assert!(!Activated.can_transition(Expired));
    assert!(!Expired.can_transition(Live));
    assert!(!Scheduled.can_transition(Activated));
  }

  #[test]
  fn test_claimable_states() {
    assert!(Live.is_claimable());
    assert!(Activated.is_claimable());
    assert!(!Scheduled.is_claimable());
    assert!(!Expired.is_claimable());
  }
}
