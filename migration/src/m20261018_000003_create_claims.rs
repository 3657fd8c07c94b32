use sea_orm_migration::prelude::*;

use super::m20261018_000002_create_deals::Deals;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Claims::Table)
          .if_not_exists()
          .col(ColumnDef::new(Claims::DealId).integer().not_null())
          .col(ColumnDef::new(Claims::ClaimantId).big_integer().not_null())
          .col(ColumnDef::new(Claims::Position).integer().not_null())
          .col(ColumnDef::new(Claims::CouponCode).string().null())
          .col(ColumnDef::new(Claims::ReferredBy).big_integer().null())
          .col(
            ColumnDef::new(Claims::MilestonesSent)
              .string()
              .not_null()
              .default(""),
          )
          .col(ColumnDef::new(Claims::ClaimedAt).date_time().not_null())
          .primary_key(
            Index::create().col(Claims::DealId).col(Claims::ClaimantId),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_claims_deal")
              .from(Claims::Table, Claims::DealId)
              .to(Deals::Table, Deals::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    // Gap-free positions are assigned under the deal lock; the index turns a
    // cross-process race into a retryable conflict.
    manager
      .create_index(
        Index::create()
          .name("idx_claims_deal_position")
          .table(Claims::Table)
          .col(Claims::DealId)
          .col(Claims::Position)
          .unique()
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(Coupons::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Coupons::Code)
              .string()
              .not_null()
              .primary_key(),
          )
          .col(ColumnDef::new(Coupons::DealId).integer().not_null())
          .col(ColumnDef::new(Coupons::ClaimantId).big_integer().not_null())
          .col(ColumnDef::new(Coupons::MerchantId).big_integer().not_null())
          .col(ColumnDef::new(Coupons::DiscountPercent).integer().not_null())
          .col(ColumnDef::new(Coupons::ValidUntil).date_time().not_null())
          .col(
            ColumnDef::new(Coupons::Redeemed)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(ColumnDef::new(Coupons::RedeemedAt).date_time().null())
          .col(ColumnDef::new(Coupons::CreatedAt).date_time().not_null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_coupons_deal")
              .from(Coupons::Table, Coupons::DealId)
              .to(Deals::Table, Deals::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_coupons_deal_claimant")
          .table(Coupons::Table)
          .col(Coupons::DealId)
          .col(Coupons::ClaimantId)
          .unique()
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Coupons::Table).to_owned()).await?;
    manager.drop_table(Table::drop().table(Claims::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Claims {
  Table,
  DealId,
  ClaimantId,
  Position,
  CouponCode,
  ReferredBy,
  MilestonesSent,
  ClaimedAt,
}

#[derive(DeriveIden)]
pub enum Coupons {
  Table,
  Code,
  DealId,
  ClaimantId,
  MerchantId,
  DiscountPercent,
  ValidUntil,
  Redeemed,
  RedeemedAt,
  CreatedAt,
}
