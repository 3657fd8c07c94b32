use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(NotificationBatches::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(NotificationBatches::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(
            ColumnDef::new(NotificationBatches::RecipientId)
              .big_integer()
              .not_null(),
          )
          .col(ColumnDef::new(NotificationBatches::Address).string().not_null())
          .col(ColumnDef::new(NotificationBatches::Reason).string().not_null())
          .col(ColumnDef::new(NotificationBatches::Cadence).string().not_null())
          .col(
            ColumnDef::new(NotificationBatches::ScheduledFor)
              .date_time()
              .not_null(),
          )
          .col(
            ColumnDef::new(NotificationBatches::Status)
              .string()
              .not_null()
              .default("pending"),
          )
          .col(
            ColumnDef::new(NotificationBatches::CreatedAt)
              .date_time()
              .not_null(),
          )
          .col(ColumnDef::new(NotificationBatches::SentAt).date_time().null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_notification_batches_due")
          .table(NotificationBatches::Table)
          .col(NotificationBatches::Status)
          .col(NotificationBatches::ScheduledFor)
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(NotificationItems::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(NotificationItems::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(NotificationItems::BatchId).integer().not_null())
          .col(ColumnDef::new(NotificationItems::Kind).string().not_null())
          .col(ColumnDef::new(NotificationItems::DealId).integer().null())
          .col(ColumnDef::new(NotificationItems::Body).text().not_null())
          .col(
            ColumnDef::new(NotificationItems::CreatedAt)
              .date_time()
              .not_null(),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_notification_items_batch")
              .from(NotificationItems::Table, NotificationItems::BatchId)
              .to(NotificationBatches::Table, NotificationBatches::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(NotificationItems::Table).to_owned())
      .await?;
    manager
      .drop_table(Table::drop().table(NotificationBatches::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
pub enum NotificationBatches {
  Table,
  Id,
  RecipientId,
  Address,
  Reason,
  Cadence,
  ScheduledFor,
  Status,
  CreatedAt,
  SentAt,
}

#[derive(DeriveIden)]
pub enum NotificationItems {
  Table,
  Id,
  BatchId,
  Kind,
  DealId,
  Body,
  CreatedAt,
}
