//! Pure "when should this go out" rules. All inputs and outputs are UTC;
//! slots and quiet hours are evaluated in the configured local offset.

use chrono::{FixedOffset, NaiveTime};

use crate::{config::Config, entity::Cadence, prelude::*};

const MORNING_SLOT: (u32, u32) = (9, 0);
const EVENING_SLOT: (u32, u32) = (18, 0);

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
  offset: FixedOffset,
  quiet_start: NaiveTime,
  quiet_end: NaiveTime,
}

impl Schedule {
  pub fn new(
    offset: FixedOffset,
    quiet_start: NaiveTime,
    quiet_end: NaiveTime,
  ) -> Self {
    Self { offset, quiet_start, quiet_end }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.utc_offset, config.quiet_start, config.quiet_end)
  }

  fn to_local(&self, utc: DateTime) -> DateTime {
    utc + TimeDelta::seconds(self.offset.local_minus_utc() as i64)
  }

  fn to_utc(&self, local: DateTime) -> DateTime {
    local - TimeDelta::seconds(self.offset.local_minus_utc() as i64)
  }

  pub fn in_quiet_hours(&self, utc: DateTime) -> bool {
    let t = self.to_local(utc).time();
    let (start, end) = (self.quiet_start, self.quiet_end);
    if start == end {
      false
    } else if start < end {
      t >= start && t < end
    } else {
      t >= start || t < end
    }
  }

  /// End of the quiet window that contains `utc`, or the next one.
  pub fn quiet_end_after(&self, utc: DateTime) -> DateTime {
    self.to_utc(next_slot(self.to_local(utc), self.quiet_end))
  }

  /// When a batch opened at `utc` for this cadence should be sent.
  pub fn next_send(&self, cadence: Cadence, utc: DateTime) -> DateTime {
    let local = self.to_local(utc);
    let at = match cadence {
      Cadence::Immediate => return utc,
      Cadence::EveryTwoHours => {
        let next_hour = (local.hour() / 2 + 1) * 2;
        local.date().and_time(NaiveTime::MIN)
          + TimeDelta::hours(next_hour as i64)
      }
      Cadence::TwiceDaily => {
        let morning = next_slot(local, slot(MORNING_SLOT));
        morning.min(next_slot(local, slot(EVENING_SLOT)))
      }
      Cadence::Daily => next_slot(local, slot(MORNING_SLOT)),
    };

    let at = self.to_utc(at);
    if self.in_quiet_hours(at) { self.quiet_end_after(at) } else { at }
  }
}

fn slot((hour, min): (u32, u32)) -> NaiveTime {
  NaiveTime::from_hms_opt(hour, min, 0).unwrap_or(NaiveTime::MIN)
}

/// First moment strictly after `now` whose time of day is `at`.
fn next_slot(now: DateTime, at: NaiveTime) -> DateTime {
  let candidate = now.date().and_time(at);
  if candidate > now { candidate } else { candidate + TimeDelta::days(1) }
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, Offset};

  use super::*;

  fn at(h: u32, m: u32) -> DateTime {
    NaiveDate::from_ymd_opt(2026, 10, 18)
      .unwrap()
      .and_hms_opt(h, m, 0)
      .unwrap()
  }

  fn next_day(h: u32, m: u32) -> DateTime {
    at(h, m) + TimeDelta::days(1)
  }

  fn utc_schedule() -> Schedule {
    Schedule::new(Utc.fix(), slot((22, 0)), slot((7, 0)))
  }

  #[test]
  fn test_quiet_window_wraps_midnight() {
    let s = utc_schedule();
    assert!(s.in_quiet_hours(at(22, 0)));
    assert!(s.in_quiet_hours(at(23, 59)));
    assert!(s.in_quiet_hours(at(3, 0)));
    assert!(!s.in_quiet_hours(at(7, 0)));
    assert!(!s.in_quiet_hours(at(12, 0)));
    assert!(!s.in_quiet_hours(at(21, 59)));
  }

  #[test]
  fn test_quiet_end() {
    let s = utc_schedule();
    assert_eq!(s.quiet_end_after(at(23, 0)), next_day(7, 0));
    assert_eq!(s.quiet_end_after(at(2, 30)), at(7, 0));
  }

  #[test]
  fn test_local_offset() {
    // UTC+3: 20:00 UTC is 23:00 local, quiet until 07:00 local = 04:00 UTC
    let s = Schedule::new(
      FixedOffset::east_opt(3 * 3600).unwrap(),
      slot((22, 0)),
      slot((7, 0)),
    );
    assert!(s.in_quiet_hours(at(20, 0)));
    assert!(!s.in_quiet_hours(at(18, 0)));
    assert_eq!(s.quiet_end_after(at(20, 0)), next_day(4, 0));
  }

  #[test]
  fn test_cadence_slots() {
    let s = utc_schedule();
    assert_eq!(s.next_send(Cadence::Immediate, at(13, 10)), at(13, 10));
    assert_eq!(s.next_send(Cadence::EveryTwoHours, at(13, 10)), at(14, 0));
    assert_eq!(s.next_send(Cadence::EveryTwoHours, at(14, 0)), at(16, 0));
    assert_eq!(s.next_send(Cadence::TwiceDaily, at(8, 0)), at(9, 0));
    assert_eq!(s.next_send(Cadence::TwiceDaily, at(12, 0)), at(18, 0));
    assert_eq!(s.next_send(Cadence::TwiceDaily, at(19, 0)), next_day(9, 0));
    assert_eq!(s.next_send(Cadence::Daily, at(10, 0)), next_day(9, 0));
  }

  #[test]
  fn test_cadence_never_lands_in_quiet_hours() {
    let s = utc_schedule();
    // 21:30 -> next even hour is 22:00, which is quiet
    assert_eq!(
      s.next_send(Cadence::EveryTwoHours, at(21, 30)),
      next_day(7, 0)
    );
    // 23:00 -> 00:00 next day, quiet as well
    assert_eq!(
      s.next_send(Cadence::EveryTwoHours, at(23, 0)),
      next_day(7, 0)
    );
  }
}
