use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Deals::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Deals::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(Deals::MerchantId).big_integer().not_null())
          .col(ColumnDef::new(Deals::Title).string().not_null())
          .col(ColumnDef::new(Deals::Product).string().not_null())
          .col(ColumnDef::new(Deals::DiscountPercent).integer().not_null())
          .col(ColumnDef::new(Deals::MaxDiscountValue).big_integer().null())
          .col(ColumnDef::new(Deals::TargetClaims).integer().not_null())
          .col(
            ColumnDef::new(Deals::CurrentClaims)
              .integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Deals::StartsAt).date_time().not_null())
          .col(ColumnDef::new(Deals::ExpiresAt).date_time().not_null())
          .col(ColumnDef::new(Deals::OriginalExpiresAt).date_time().not_null())
          .col(ColumnDef::new(Deals::CouponValidUntil).date_time().not_null())
          .col(
            ColumnDef::new(Deals::State)
              .string()
              .not_null()
              .default("scheduled"),
          )
          .col(
            ColumnDef::new(Deals::CurrentTierLevel)
              .integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Deals::CouponPrefix)
              .string()
              .not_null()
              .default("FLASH"),
          )
          .col(
            ColumnDef::new(Deals::IsSurprise)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(ColumnDef::new(Deals::HiddenTitle).string().null())
          .col(ColumnDef::new(Deals::HiddenDiscount).integer().null())
          .col(ColumnDef::new(Deals::HiddenProduct).string().null())
          .col(
            ColumnDef::new(Deals::WasExtended)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(
            ColumnDef::new(Deals::BonusAdded)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(ColumnDef::new(Deals::OriginLat).double().not_null())
          .col(ColumnDef::new(Deals::OriginLng).double().not_null())
          .col(ColumnDef::new(Deals::RadiusKm).double().not_null())
          .col(
            ColumnDef::new(Deals::NotifiedCount)
              .integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Deals::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Deals::ActivatedAt).date_time().null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_deals_state_expires")
          .table(Deals::Table)
          .col(Deals::State)
          .col(Deals::ExpiresAt)
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(DealTiers::Table)
          .if_not_exists()
          .col(ColumnDef::new(DealTiers::DealId).integer().not_null())
          .col(ColumnDef::new(DealTiers::Level).integer().not_null())
          .col(ColumnDef::new(DealTiers::ClaimsRequired).integer().not_null())
          .col(ColumnDef::new(DealTiers::DiscountPercent).integer().not_null())
          .primary_key(
            Index::create().col(DealTiers::DealId).col(DealTiers::Level),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_deal_tiers_deal")
              .from(DealTiers::Table, DealTiers::DealId)
              .to(Deals::Table, Deals::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(DealTiers::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Deals::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Deals {
  Table,
  Id,
  MerchantId,
  Title,
  Product,
  DiscountPercent,
  MaxDiscountValue,
  TargetClaims,
  CurrentClaims,
  StartsAt,
  ExpiresAt,
  OriginalExpiresAt,
  CouponValidUntil,
  State,
  CurrentTierLevel,
  CouponPrefix,
  IsSurprise,
  HiddenTitle,
  HiddenDiscount,
  HiddenProduct,
  WasExtended,
  BonusAdded,
  OriginLat,
  OriginLng,
  RadiusKm,
  NotifiedCount,
  CreatedAt,
  ActivatedAt,
}

#[derive(DeriveIden)]
pub enum DealTiers {
  Table,
  DealId,
  Level,
  ClaimsRequired,
  DiscountPercent,
}
