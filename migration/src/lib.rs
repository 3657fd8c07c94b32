pub use sea_orm_migration::prelude::*;

mod m20261018_000001_create_recipients;
mod m20261018_000002_create_deals;
mod m20261018_000003_create_claims;
mod m20261018_000004_create_notification_batches;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20261018_000001_create_recipients::Migration),
      Box::new(m20261018_000002_create_deals::Migration),
      Box::new(m20261018_000003_create_claims::Migration),
      Box::new(m20261018_000004_create_notification_batches::Migration),
    ]
  }
}
