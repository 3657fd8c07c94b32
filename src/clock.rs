use crate::prelude::*;

/// Source of "now" in UTC. Everything time-dependent takes one of these so
/// schedules can be tested without sleeping.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime {
    Utc::now().naive_utc()
  }
}

#[cfg(test)]
pub use manual::ManualClock;
