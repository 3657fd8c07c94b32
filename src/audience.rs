//! Who hears about a deal when it goes live.

use std::{path::Path, sync::RwLock};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{notify::Recipient, prelude::*};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Default, Clone)]
pub struct AudienceFilters {
  /// Never included, typically the merchant who owns the deal.
  pub exclude: HashSet<i64>,
  pub language: Option<String>,
}

#[async_trait]
pub trait AudienceResolver: Send + Sync {
  async fn resolve(
    &self,
    lat: f64,
    lng: f64,
    radius_km: f64,
    filters: &AudienceFilters,
  ) -> Result<Vec<Recipient>>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
  #[serde(flatten)]
  pub recipient: Recipient,
  pub lat: f64,
  pub lng: f64,
}

/// In-memory audience filtered by great-circle distance.
#[derive(Default)]
pub struct StaticAudience {
  members: RwLock<Vec<Member>>,
}

impl StaticAudience {
  pub fn new(members: Vec<Member>) -> Self {
    Self { members: RwLock::new(members) }
  }

  /// Loads a JSON array of members.
  pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
    let raw = std::fs::read_to_string(path)?;
    let members: Vec<Member> = json::from_str(&raw)?;
    Ok(Self::new(members))
  }

  pub fn register(&self, recipient: Recipient, lat: f64, lng: f64) {
    let mut members = match self.members.write() {
      Ok(members) => members,
      Err(poisoned) => poisoned.into_inner(),
    };
    members.retain(|m| m.recipient.id != recipient.id);
    members.push(Member { recipient, lat, lng });
  }

  pub fn len(&self) -> usize {
    self.members.read().map(|m| m.len()).unwrap_or_default()
  }
}

#[async_trait]
impl AudienceResolver for StaticAudience {
  async fn resolve(
    &self,
    lat: f64,
    lng: f64,
    radius_km: f64,
    filters: &AudienceFilters,
  ) -> Result<Vec<Recipient>> {
    let members = self
      .members
      .read()
      .map_err(|_| Error::Internal("audience lock poisoned".into()))?;

    Ok(
      members
        .iter()
        .filter(|m| !filters.exclude.contains(&m.recipient.id))
        .filter(|m| {
          filters
            .language
            .as_deref()
            .is_none_or(|lang| m.recipient.language == lang)
        })
        .filter(|m| haversine_km(lat, lng, m.lat, m.lng) <= radius_km)
        .map(|m| m.recipient.clone())
        .collect(),
    )
  }
}

pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
  let (dlat, dlng) = ((lat2 - lat1).to_radians(), (lng2 - lng1).to_radians());
  let a = (dlat / 2.0).sin().powi(2)
    + lat1.to_radians().cos()
      * lat2.to_radians().cos()
      * (dlng / 2.0).sin().powi(2);
  2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
