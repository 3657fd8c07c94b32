use sea_orm::sea_query::OnConflict;

use crate::{
  clock::Clock,
  entity::{Cadence, claim, recipient},
  notify::Recipient,
  prelude::*,
};

pub struct Recipients<'a> {
  db: &'a DatabaseConnection,
  clock: &'a dyn Clock,
}

impl<'a> Recipients<'a> {
  pub fn new(db: &'a DatabaseConnection, clock: &'a dyn Clock) -> Self {
    Self { db, clock }
  }

  /// Known recipient, or a fresh one reachable at their own chat id.
  pub async fn get_or_create(&self, id: i64) -> Result<recipient::Model> {
    if let Some(found) = recipient::Entity::find_by_id(id).one(self.db).await?
    {
      return Ok(found);
    }

    let model = recipient::ActiveModel {
      id: Set(id),
      address: Set(id.to_string()),
      language: Set("en".into()),
      cadence: Set(Cadence::Immediate),
      created_at: Set(self.clock.now()),
    };
    recipient::Entity::insert(model)
      .on_conflict(
        OnConflict::column(recipient::Column::Id).do_nothing().to_owned(),
      )
      .do_nothing()
      .exec(self.db)
      .await?;

    recipient::Entity::find_by_id(id)
      .one(self.db)
      .await?
      .ok_or_else(|| Error::Internal(format!("recipient {id} vanished")))
  }

  pub async fn by_id(&self, id: i64) -> Result<Option<recipient::Model>> {
    Ok(recipient::Entity::find_by_id(id).one(self.db).await?)
  }

  /// Records the audience's addresses and returns everyone with their
  /// stored preferences, in input order.
  pub async fn sync(
    &self,
    recipients: &[Recipient],
  ) -> Result<Vec<Recipient>> {
    if recipients.is_empty() {
      return Ok(Vec::new());
    }

    let now = self.clock.now();
    let models = recipients.iter().map(|r| recipient::ActiveModel {
      id: Set(r.id),
      address: Set(r.address.clone()),
      language: Set(r.language.clone()),
      cadence: Set(r.cadence),
      created_at: Set(now),
    });
    recipient::Entity::insert_many(models)
      .on_conflict(
        OnConflict::column(recipient::Column::Id)
          .update_column(recipient::Column::Address)
          .to_owned(),
      )
      .exec_without_returning(self.db)
      .await?;

    let ids: Vec<i64> = recipients.iter().map(|r| r.id).collect();
    let mut stored: HashMap<i64, recipient::Model> = recipient::Entity::find()
      .filter(recipient::Column::Id.is_in(ids.clone()))
      .all(self.db)
      .await?
      .into_iter()
      .map(|r| (r.id, r))
      .collect();

    Ok(
      ids
        .iter()
        .filter_map(|id| stored.remove(id))
        .map(Into::into)
        .collect(),
    )
  }

  pub async fn set_cadence(
    &self,
    id: i64,
    cadence: Cadence,
  ) -> Result<recipient::Model> {
    let found = self.get_or_create(id).await?;
    let updated = recipient::ActiveModel { cadence: Set(cadence), ..found.into() }
      .update(self.db)
      .await?;
    info!(recipient_id = id, cadence = cadence.as_str(), "cadence changed");
    Ok(updated)
  }

  pub async fn set_language(&self, id: i64, language: &str) -> Result<()> {
    let found = self.get_or_create(id).await?;
    if found.language != language {
      recipient::ActiveModel {
        language: Set(language.to_string()),
        ..found.into()
      }
      .update(self.db)
      .await?;
    }
    Ok(())
  }

  pub async fn resolve(&self, id: i64) -> Result<Recipient> {
    Ok(self.get_or_create(id).await?.into())
  }

  /// Recipients for the given claims, in claim order.
  pub async fn for_claims(
    &self,
    claims: &[claim::Model],
  ) -> Result<Vec<Recipient>> {
    let ids: Vec<i64> = claims.iter().map(|c| c.claimant_id).collect();
    let mut found: HashMap<i64, recipient::Model> = recipient::Entity::find()
      .filter(recipient::Column::Id.is_in(ids.clone()))
      .all(self.db)
      .await?
      .into_iter()
      .map(|r| (r.id, r))
      .collect();

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
      let model = match found.remove(&id) {
        Some(model) => model,
        None => self.get_or_create(id).await?,
      };
      out.push(model.into());
    }
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sv::test_utils::TestApp;

  #[tokio::test]
  async fn test_get_or_create_is_stable() {
    let app = TestApp::new().await;
    let sv = app.sv();

    let first = sv.recipients.get_or_create(42).await.unwrap();
    assert_eq!(first.address, "42");
    assert_eq!(first.cadence, Cadence::Immediate);

    sv.recipients.set_cadence(42, Cadence::Daily).await.unwrap();
    let again = sv.recipients.get_or_create(42).await.unwrap();
    assert_eq!(again.cadence, Cadence::Daily);
    assert_eq!(again.created_at, first.created_at);
  }

  #[tokio::test]
  async fn test_sync_keeps_stored_preferences() {
    let app = TestApp::new().await;
    let sv = app.sv();

    sv.recipients.set_cadence(7, Cadence::TwiceDaily).await.unwrap();
    let mut reported = crate::sv::test_utils::recipient(7, Cadence::Immediate);
    reported.address = "700".into();
    let fresh = crate::sv::test_utils::recipient(8, Cadence::Daily);

    let synced = sv.recipients.sync(&[reported, fresh]).await.unwrap();
    assert_eq!(synced.len(), 2);
    assert_eq!(synced[0].address, "700");
    assert_eq!(synced[0].cadence, Cadence::TwiceDaily);
    assert_eq!(synced[1].cadence, Cadence::Daily);
  }

  #[tokio::test]
  async fn test_set_language_updates_stored_recipient() {
    let app = TestApp::new().await;
    let sv = app.sv();

    sv.recipients.set_language(9, "es").await.unwrap();
    assert_eq!(sv.recipients.resolve(9).await.unwrap().language, "es");
    sv.recipients.set_language(9, "es").await.unwrap();
    sv.recipients.set_language(9, "ru").await.unwrap();
    assert_eq!(sv.recipients.resolve(9).await.unwrap().language, "ru");
  }
}
