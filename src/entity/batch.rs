use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::{item, recipient::Cadence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum BatchReason {
  #[sea_orm(string_value = "frequency-batch")]
  FrequencyBatch,
  #[sea_orm(string_value = "quiet-hours")]
  QuietHours,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum BatchStatus {
  #[sea_orm(string_value = "pending")]
  #[default]
  Pending,
  #[sea_orm(string_value = "in_flight")]
  InFlight,
  #[sea_orm(string_value = "sent")]
  Sent,
  #[sea_orm(string_value = "skipped")]
  Skipped,
  #[sea_orm(string_value = "failed")]
  Failed,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification_batches")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i32,
  pub recipient_id: i64,
  pub address: String,
  pub reason: BatchReason,
  pub cadence: Cadence,
  pub scheduled_for: DateTime,
  pub status: BatchStatus,
  pub created_at: DateTime,
  pub sent_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "item::Entity")]
  Items,
}

impl Related<item::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Items.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
