//! Timezone-aware day boundaries for day-granularity statistics.

use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayCalendar {
    tz: Tz,
}

impl Default for DayCalendar {
    fn default() -> Self {
        Self {
            tz: chrono_tz::Europe::Paris,
        }
    }
}

impl DayCalendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    // Zones that skip midnight on a DST switch start the day at the first valid instant.
    pub fn day_start_ms(&self, date: NaiveDate) -> i64 {
        let local_midnight = date.and_time(NaiveTime::MIN);
        if let Some(dt) = self.tz.from_local_datetime(&local_midnight).earliest() {
            return dt.timestamp_millis();
        }

        let shifted = local_midnight + ChronoDuration::hours(1);
        self.tz
            .from_local_datetime(&shifted)
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| local_midnight.and_utc().timestamp_millis())
    }

    pub fn day_window(&self, date: NaiveDate) -> (i64, i64) {
        (self.day_start_ms(date), self.day_start_ms(next_day(date)))
    }

    pub fn date_of(&self, ts_ms_utc: i64) -> Option<NaiveDate> {
        let utc = Utc.timestamp_millis_opt(ts_ms_utc).single()?;
        Some(utc.with_timezone(&self.tz).date_naive())
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX)
}

pub fn previous_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN)
}

pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}
