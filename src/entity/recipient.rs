use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How often a recipient wants non-urgent alerts delivered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "kebab-case")]
pub enum Cadence {
  #[sea_orm(string_value = "immediate")]
  #[default]
  Immediate,
  #[sea_orm(string_value = "every-2-hours")]
  #[serde(rename = "every-2-hours")]
  EveryTwoHours,
  #[sea_orm(string_value = "twice-daily")]
  TwiceDaily,
  #[sea_orm(string_value = "daily")]
  Daily,
}

impl Cadence {
  pub fn as_str(&self) -> &'static str {
    match self {
      Cadence::Immediate => "immediate",
      Cadence::EveryTwoHours => "every-2-hours",
      Cadence::TwiceDaily => "twice-daily",
      Cadence::Daily => "daily",
    }
  }
}

impl std::str::FromStr for Cadence {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "immediate" => Ok(Cadence::Immediate),
      "every-2-hours" => Ok(Cadence::EveryTwoHours),
      "twice-daily" => Ok(Cadence::TwiceDaily),
      "daily" => Ok(Cadence::Daily),
      other => Err(format!("unknown cadence `{other}`")),
    }
  }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "recipients")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: i64,
  pub address: String,
  pub language: String,
  pub cadence: Cadence,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
