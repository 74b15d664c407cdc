//! Backward block scans for the oldest and newest stored points.
//!
//! The store only answers bounded range queries, so both scans walk fixed 7-day
//! blocks back from `today` (exclusive) to a bounded horizon of 153 blocks.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::calendar::{days_before, DayCalendar};
use crate::store::{StatStore, StoreError};
use crate::StatPoint;

pub const LOOKBACK_BLOCK_DAYS: u64 = 7;
pub const LOOKBACK_MAX_BLOCKS: u64 = 153;

// Data can start anywhere inside a block and blocks can be empty between populated
// ones, so every block is queried and the oldest non-empty one wins.
pub fn locate_oldest_point(
    store: &mut dyn StatStore,
    statistic_id: &str,
    calendar: &DayCalendar,
    today: NaiveDate,
) -> Result<Option<StatPoint>, StoreError> {
    let mut oldest = None;
    let mut non_empty_blocks = 0u64;

    for block in 0..LOOKBACK_MAX_BLOCKS {
        let (start, end) = block_window(calendar, today, block);
        let points = store.statistics_during_period(statistic_id, start, end)?;
        if let Some(first) = points.first() {
            oldest = Some(*first);
            non_empty_blocks += 1;
        }
    }

    match oldest {
        Some(point) => info!(
            component = "locator",
            event = "locator.oldest.found",
            statistic_id,
            start_ts_ms_utc = point.start_ts_ms_utc,
            non_empty_blocks
        ),
        None => debug!(
            component = "locator",
            event = "locator.oldest.none",
            statistic_id,
            blocks = LOOKBACK_MAX_BLOCKS
        ),
    }

    Ok(oldest)
}

pub fn locate_latest_point(
    store: &mut dyn StatStore,
    statistic_id: &str,
    calendar: &DayCalendar,
    today: NaiveDate,
) -> Result<Option<StatPoint>, StoreError> {
    for block in 0..LOOKBACK_MAX_BLOCKS {
        let (start, end) = block_window(calendar, today, block);
        let points = store.statistics_during_period(statistic_id, start, end)?;
        if let Some(last) = points.last() {
            debug!(
                component = "locator",
                event = "locator.latest.found",
                statistic_id,
                start_ts_ms_utc = last.start_ts_ms_utc,
                block
            );
            return Ok(Some(*last));
        }
    }

    Ok(None)
}

fn block_window(calendar: &DayCalendar, today: NaiveDate, block: u64) -> (i64, i64) {
    let end_day = days_before(today, block * LOOKBACK_BLOCK_DAYS);
    let start_day = days_before(today, (block + 1) * LOOKBACK_BLOCK_DAYS);
    (calendar.day_start_ms(start_day), calendar.day_start_ms(end_day))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, SeriesId, SqliteStatStore};

    fn cal() -> DayCalendar {
        DayCalendar::new(chrono_tz::UTC)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed(store: &mut SqliteStatStore, days: &[NaiveDate]) -> String {
        let meta = SeriesId::energy("loc", Direction::Consumption).metadata("EUR");
        let points: Vec<StatPoint> = days
            .iter()
            .enumerate()
            .map(|(i, day)| StatPoint {
                start_ts_ms_utc: cal().day_start_ms(*day),
                state: Some(1.0),
                sum: (i + 1) as f64,
            })
            .collect();
        store.import_statistics(&meta, &points).unwrap();
        meta.statistic_id
    }

    #[test]
    fn oldest_walks_past_empty_blocks() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let today = date(2025, 6, 1);
        // Two populated stretches with a multi-week hole between them.
        let id = seed(
            &mut store,
            &[date(2025, 2, 10), date(2025, 2, 11), date(2025, 5, 30)],
        );

        let oldest = locate_oldest_point(&mut store, &id, &cal(), today)
            .unwrap()
            .unwrap();
        assert_eq!(oldest.start_ts_ms_utc, cal().day_start_ms(date(2025, 2, 10)));
    }

    #[test]
    fn oldest_ignores_data_beyond_the_horizon() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let today = date(2025, 6, 1);
        let beyond = days_before(today, LOOKBACK_BLOCK_DAYS * LOOKBACK_MAX_BLOCKS + 1);
        let id = seed(&mut store, &[beyond, date(2025, 1, 1)]);

        let oldest = locate_oldest_point(&mut store, &id, &cal(), today)
            .unwrap()
            .unwrap();
        assert_eq!(oldest.start_ts_ms_utc, cal().day_start_ms(date(2025, 1, 1)));
    }

    #[test]
    fn empty_series_reports_none() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let got = locate_oldest_point(&mut store, "meter:none", &cal(), date(2025, 6, 1)).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn latest_stops_at_first_populated_block() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let today = date(2025, 6, 1);
        let id = seed(
            &mut store,
            &[date(2025, 4, 1), date(2025, 5, 2), date(2025, 5, 3)],
        );

        let latest = locate_latest_point(&mut store, &id, &cal(), today)
            .unwrap()
            .unwrap();
        assert_eq!(latest.start_ts_ms_utc, cal().day_start_ms(date(2025, 5, 3)));
        assert_eq!(latest.sum, 3.0);
    }

    #[test]
    fn today_is_outside_every_block() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let today = date(2025, 6, 1);
        let id = seed(&mut store, &[today]);

        assert!(locate_latest_point(&mut store, &id, &cal(), today)
            .unwrap()
            .is_none());
    }
}
