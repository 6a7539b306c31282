use std::sync::Arc;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  NaiveTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>
}

impl ManualClock {
  pub fn new(
    start: DateTime<Utc>
  ) -> Self {
    Self {
      now: Mutex::new(start)
    }
  }

  pub fn set(&self, now: DateTime<Utc>) {
    *self.now.lock() = now;
  }

  pub fn advance(
    &self,
    by: chrono::Duration
  ) {
    let mut now = self.now.lock();
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}

/// Wall clock plus the timezone that
/// decides what "today" and "same day"
/// mean for the caseload.
#[derive(Clone)]
pub struct Calendar {
  clock: Arc<dyn Clock>,
  tz:    Tz
}

impl std::fmt::Debug for Calendar {
  fn fmt(
    &self,
    f: &mut std::fmt::Formatter<'_>
  ) -> std::fmt::Result {
    f.debug_struct("Calendar")
      .field("now", &self.clock.now())
      .field("tz", &self.tz)
      .finish()
  }
}

impl Calendar {
  pub fn new(
    clock: Arc<dyn Clock>,
    tz: Tz
  ) -> Self {
    Self { clock, tz }
  }

  pub fn system(tz: Tz) -> Self {
    Self::new(Arc::new(SystemClock), tz)
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  pub fn timezone(&self) -> Tz {
    self.tz
  }

  #[must_use]
  pub fn today(&self) -> NaiveDate {
    self.local_date(self.clock.now())
  }

  #[must_use]
  pub fn local_date(
    &self,
    dt: DateTime<Utc>
  ) -> NaiveDate {
    dt.with_timezone(&self.tz)
      .date_naive()
  }

  /// First instant of `date` in the
  /// calendar's timezone. When midnight
  /// falls in a DST gap the earliest
  /// valid instant after it is used.
  #[must_use]
  pub fn day_start(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    let local = self
      .tz
      .from_local_datetime(&midnight)
      .earliest()
      .or_else(|| {
        self
          .tz
          .from_local_datetime(
            &(midnight + chrono::Duration::hours(1))
          )
          .earliest()
      });
    match local {
      | Some(local) => local.with_timezone(&Utc),
      | None => Utc.from_utc_datetime(&midnight)
    }
  }
}

/// Day/month label shown next to status
/// updates, e.g. `3/6` for June 3rd.
#[must_use]
pub fn short_display_date(
  date: NaiveDate
) -> String {
  format!(
    "{}/{}",
    date.day(),
    date.month()
  )
}

pub fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(anyhow!(
      "timezone cannot be empty"
    ));
  }

  trimmed.parse::<Tz>().map_err(|err| {
    anyhow!(
      "failed to parse timezone id \
       {trimmed}: {err}"
    )
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn today_follows_configured_timezone()
  {
    let clock = Arc::new(
      ManualClock::new(
        Utc
          .with_ymd_and_hms(
            2026, 6, 4, 2, 30, 0
          )
          .single()
          .expect("valid now")
      )
    );
    let utc =
      Calendar::new(clock.clone(), chrono_tz::UTC);
    let mexico = Calendar::new(
      clock,
      parse_timezone(
        "America/Mexico_City"
      )
      .expect("parse tz")
    );

    assert_eq!(
      utc.today(),
      NaiveDate::from_ymd_opt(2026, 6, 4)
        .expect("date")
    );
    assert_eq!(
      mexico.today(),
      NaiveDate::from_ymd_opt(2026, 6, 3)
        .expect("date")
    );
  }

  #[test]
  fn day_start_is_local_midnight() {
    let clock = Arc::new(ManualClock::new(
      Utc
        .with_ymd_and_hms(2026, 6, 4, 12, 0, 0)
        .single()
        .expect("valid now")
    ));
    let mexico = Calendar::new(
      clock,
      parse_timezone("America/Mexico_City")
        .expect("parse tz")
    );
    let date =
      NaiveDate::from_ymd_opt(2026, 6, 4)
        .expect("date");

    assert_eq!(
      mexico.day_start(date),
      Utc
        .with_ymd_and_hms(2026, 6, 4, 6, 0, 0)
        .single()
        .expect("valid ts")
    );
  }

  #[test]
  fn short_date_is_day_then_month() {
    let date =
      NaiveDate::from_ymd_opt(2026, 6, 3)
        .expect("date");
    assert_eq!(
      short_display_date(date),
      "3/6"
    );
  }

  #[test]
  fn rejects_unknown_timezone() {
    assert!(
      parse_timezone("Mars/Olympus")
        .is_err()
    );
    assert!(parse_timezone("  ").is_err());
  }
}
