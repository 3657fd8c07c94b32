use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Recipients::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Recipients::Id)
              .big_integer()
              .not_null()
              .primary_key(),
          )
          .col(ColumnDef::new(Recipients::Address).string().not_null())
          .col(
            ColumnDef::new(Recipients::Language)
              .string()
              .not_null()
              .default("en"),
          )
          .col(
            ColumnDef::new(Recipients::Cadence)
              .string()
              .not_null()
              .default("immediate"),
          )
          .col(ColumnDef::new(Recipients::CreatedAt).date_time().not_null())
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Recipients::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Recipients {
  Table,
  Id,
  Address,
  Language,
  Cadence,
  CreatedAt,
}
