use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::batch;

/// What an outbound message is about. Digests group items by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum MessageKind {
  #[sea_orm(string_value = "deal_live")]
  DealLive,
  #[sea_orm(string_value = "claimed")]
  Claimed,
  #[sea_orm(string_value = "milestone")]
  Milestone,
  #[sea_orm(string_value = "referral")]
  Referral,
  #[sea_orm(string_value = "celebration")]
  Celebration,
  #[sea_orm(string_value = "activation_summary")]
  ActivationSummary,
  #[sea_orm(string_value = "tier_unlocked")]
  TierUnlocked,
  #[sea_orm(string_value = "rescue_offer")]
  RescueOffer,
  #[sea_orm(string_value = "rescue_applied")]
  RescueApplied,
  #[sea_orm(string_value = "expired")]
  Expired,
}

impl MessageKind {
  /// Noun used in digest lines, e.g. "3 milestone updates".
  pub fn digest_label(&self) -> &'static str {
    match self {
      MessageKind::DealLive => "new deals nearby",
      MessageKind::Claimed => "claim confirmations",
      MessageKind::Milestone => "progress updates",
      MessageKind::Referral => "friends joined your deals",
      MessageKind::Celebration => "unlocked deals",
      MessageKind::ActivationSummary => "activation summaries",
      MessageKind::TierUnlocked => "bigger discounts unlocked",
      MessageKind::RescueOffer => "rescue offers",
      MessageKind::RescueApplied => "deal updates",
      MessageKind::Expired => "expired deals",
    }
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_items")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub batch_id: i32,
  pub kind: MessageKind,
  pub deal_id: Option<i32>,
  #[sea_orm(column_type = "Text")]
  pub body: String,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "batch::Entity",
    from = "Column::BatchId",
    to = "batch::Column::Id"
  )]
  Batch,
}

impl Related<batch::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Batch.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
