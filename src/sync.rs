//! Per-key mutual exclusion and one-time markers.

use std::hash::Hash;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::prelude::*;

/// A lazily populated map of async mutexes, one per key.
///
/// Different keys never contend. Entries nobody holds are dropped by [`gc`].
///
/// [`gc`]: KeyedLocks::gc
pub struct KeyedLocks<K: Eq + Hash> {
  inner: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
  pub fn new() -> Self {
    Self { inner: DashMap::new() }
  }

  pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
    // clone the Arc out so the shard guard is released before awaiting
    let mutex = self.inner.entry(key).or_default().clone();
    mutex.lock_owned().await
  }

  pub fn gc(&self) -> usize {
    let before = self.inner.len();
    self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    before - self.inner.len()
  }

  pub fn len(&self) -> usize {
    self.inner.len()
  }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
  fn default() -> Self {
    Self::new()
  }
}

/// Idempotency markers with a time to live.
///
/// `try_claim_once` is a single check-then-set on the map entry, so among
/// concurrent callers with the same key exactly one wins.
#[derive(Default)]
pub struct OnceCache {
  markers: DashMap<String, DateTime>,
}

impl OnceCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn try_claim_once(
    &self,
    key: impl Into<String>,
    ttl: Duration,
    now: DateTime,
  ) -> bool {
    use dashmap::mapref::entry::Entry;

    let ttl =
      TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(365));
    let expires_at = now + ttl;
    match self.markers.entry(key.into()) {
      Entry::Occupied(mut entry) => {
        if *entry.get() > now {
          false
        } else {
          entry.insert(expires_at);
          true
        }
      }
      Entry::Vacant(entry) => {
        entry.insert(expires_at);
        true
      }
    }
  }

  /// Drops a marker so the guarded action may run again.
  pub fn release(&self, key: &str) {
    self.markers.remove(key);
  }

  /// Runs `step` unless `key` is already marked. A failed step gives the
  /// marker back so a later call can try again.
  pub async fn run_once<T, E>(
    &self,
    key: impl Into<String>,
    ttl: Duration,
    now: DateTime,
    step: impl Future<Output = Result<T, E>>,
  ) -> Option<Result<T, E>> {
    let key = key.into();
    if !self.try_claim_once(key.clone(), ttl, now) {
      return None;
    }
    let res = step.await;
    if res.is_err() {
      self.release(&key);
    }
    Some(res)
  }

  pub fn gc(&self, now: DateTime) -> usize {
    let before = self.markers.len();
    self.markers.retain(|_, exp| *exp > now);
    before - self.markers.len()
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn t0() -> DateTime {
    NaiveDate::from_ymd_opt(2026, 10, 18)
      .unwrap()
      .and_hms_opt(12, 0, 0)
      .unwrap()
  }

  #[test]
  fn test_once_wins_only_once_until_ttl() {
    let cache = OnceCache::new();
    let ttl = Duration::from_secs(60);

    assert!(cache.try_claim_once("tier:1:1", ttl, t0()));
    assert!(!cache.try_claim_once("tier:1:1", ttl, t0()));
    assert!(cache.try_claim_once("tier:1:2", ttl, t0()));

    let later = t0() + TimeDelta::seconds(61);
    assert!(cache.try_claim_once("tier:1:1", ttl, later));
  }

  #[test]
  fn test_once_concurrent_single_winner() {
    let cache = Arc::new(OnceCache::new());
    let handles: Vec<_> = (0..16)
      .map(|_| {
        let cache = cache.clone();
        std::thread::spawn(move || {
          cache.try_claim_once("rescue:7", Duration::from_secs(60), t0())
        })
      })
      .collect();

    let wins =
      handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
    assert_eq!(wins, 1);
  }

  #[test]
  fn test_once_gc() {
    let cache = OnceCache::new();
    cache.try_claim_once("a", Duration::from_secs(1), t0());
    cache.try_claim_once("b", Duration::from_secs(100), t0());

    assert_eq!(cache.gc(t0() + TimeDelta::seconds(10)), 1);
    assert!(!cache.try_claim_once("b", Duration::from_secs(100), t0()));
  }

  #[tokio::test]
  async fn test_run_once_retries_after_failure() {
    let cache = OnceCache::new();
    let ttl = Duration::from_secs(60);

    let failed = cache
      .run_once("activation:1", ttl, t0(), async { Err::<u8, _>("offline") })
      .await;
    assert_eq!(failed, Some(Err("offline")));

    let done = cache
      .run_once("activation:1", ttl, t0(), async { Ok::<_, &str>(7) })
      .await;
    assert_eq!(done, Some(Ok(7)));

    let again = cache
      .run_once("activation:1", ttl, t0(), async { Ok::<_, &str>(8) })
      .await;
    assert_eq!(again, None);
  }

  #[tokio::test]
  async fn test_keyed_locks_gc_keeps_held() {
    let locks = KeyedLocks::<i32>::new();
    let held = locks.lock(1).await;
    drop(locks.lock(2).await);

    assert_eq!(locks.gc(), 1);
    assert_eq!(locks.len(), 1);
    drop(held);
    assert_eq!(locks.gc(), 1);
  }
}
