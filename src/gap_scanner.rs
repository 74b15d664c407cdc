//! Day-stepping gap detection over a cumulative daily series.
//!
//! The scanner walks forward one calendar day at a time from an anchor day to
//! `today` (exclusive). Consecutive days without a stored point coalesce into a
//! [`Hole`], which is only reported once a later day with data closes it. Each
//! hole carries the running totals recorded on the day before it, so the backfill
//! can continue the cumulative sum without a discontinuity.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::calendar::{next_day, previous_day, DayCalendar};
use crate::locator::locate_oldest_point;
use crate::store::{StatStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hole {
    pub from_day: NaiveDate,
    pub to_day: NaiveDate,
    pub from_ts_ms_utc: i64,
    pub to_ts_ms_utc_exclusive: i64,
    pub last_sum: f64,
    // `None` when no cost series was scanned or its lookup failed.
    pub last_cost: Option<f64>,
    pub next_ts_ms_utc: i64,
}

impl Hole {
    pub fn contains(&self, ts_ms_utc: i64) -> bool {
        self.from_ts_ms_utc <= ts_ms_utc && ts_ms_utc < self.to_ts_ms_utc_exclusive
    }

    pub fn days(&self) -> i64 {
        (self.to_day - self.from_day).num_days()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    InHole { hole_start: NaiveDate },
    Done,
}

#[derive(Debug, Clone)]
pub struct GapScanner {
    statistic_id: String,
    cost_statistic_id: Option<String>,
    calendar: DayCalendar,
    cursor: NaiveDate,
    today: NaiveDate,
    state: ScanState,
}

impl GapScanner {
    pub fn new(
        statistic_id: impl Into<String>,
        cost_statistic_id: Option<String>,
        calendar: DayCalendar,
        start_day: NaiveDate,
        today: NaiveDate,
    ) -> Self {
        Self {
            statistic_id: statistic_id.into(),
            cost_statistic_id,
            calendar,
            cursor: start_day,
            today,
            state: ScanState::Scanning,
        }
    }

    pub fn anchored(
        store: &mut dyn StatStore,
        statistic_id: &str,
        cost_statistic_id: Option<String>,
        calendar: DayCalendar,
        start_day: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Option<Self>, StoreError> {
        let start_day = match start_day {
            Some(day) => day,
            None => {
                let Some(oldest) = locate_oldest_point(store, statistic_id, &calendar, today)?
                else {
                    return Ok(None);
                };
                let oldest_day = calendar
                    .date_of(oldest.start_ts_ms_utc)
                    .ok_or(StoreError::InvalidTimestamp(oldest.start_ts_ms_utc))?;
                next_day(oldest_day)
            }
        };

        info!(
            component = "gap_scanner",
            event = "gap.scan.start",
            statistic_id,
            start_day = %start_day,
            today = %today
        );
        Ok(Some(Self::new(
            statistic_id,
            cost_statistic_id,
            calendar,
            start_day,
            today,
        )))
    }

    pub fn cursor(&self) -> NaiveDate {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ScanState::Done)
    }

    // A store error ends the scan; later calls return `Ok(None)`.
    pub fn next_hole(&mut self, store: &mut dyn StatStore) -> Result<Option<Hole>, StoreError> {
        match self.advance(store) {
            Ok(hole) => Ok(hole),
            Err(err) => {
                self.state = ScanState::Done;
                Err(err)
            }
        }
    }

    pub fn holes<'a>(self, store: &'a mut dyn StatStore) -> Holes<'a> {
        Holes {
            scanner: self,
            store,
        }
    }

    fn advance(&mut self, store: &mut dyn StatStore) -> Result<Option<Hole>, StoreError> {
        loop {
            if self.state == ScanState::Done {
                return Ok(None);
            }

            if self.cursor >= self.today {
                if let ScanState::InHole { hole_start } = self.state {
                    debug!(
                        component = "gap_scanner",
                        event = "gap.scan.trailing_hole_dropped",
                        statistic_id = %self.statistic_id,
                        hole_start = %hole_start,
                        today = %self.today
                    );
                }
                self.state = ScanState::Done;
                return Ok(None);
            }

            let (day_start, day_end) = self.calendar.day_window(self.cursor);
            let points = store.statistics_during_period(&self.statistic_id, day_start, day_end)?;

            match (self.state, points.first()) {
                (ScanState::Scanning, Some(_)) => {}
                (ScanState::Scanning, None) => {
                    self.state = ScanState::InHole {
                        hole_start: self.cursor,
                    };
                }
                (ScanState::InHole { .. }, None) => {}
                (ScanState::InHole { hole_start }, Some(first)) => {
                    let next_ts_ms_utc = first.start_ts_ms_utc;
                    let hole = self.close_hole(store, hole_start, next_ts_ms_utc)?;
                    // The closing day has data; resume on the day after it.
                    self.cursor = next_day(self.cursor);
                    self.state = ScanState::Scanning;
                    return Ok(Some(hole));
                }
                (ScanState::Done, _) => return Ok(None),
            }

            self.cursor = next_day(self.cursor);
        }
    }

    fn close_hole(
        &self,
        store: &mut dyn StatStore,
        hole_start: NaiveDate,
        next_ts_ms_utc: i64,
    ) -> Result<Hole, StoreError> {
        let last_sum = self
            .sum_before(store, &self.statistic_id, hole_start)?
            .unwrap_or(0.0);

        let last_cost = match &self.cost_statistic_id {
            None => None,
            Some(cost_id) => match self.sum_before(store, cost_id, hole_start) {
                Ok(sum) => Some(sum.unwrap_or(0.0)),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(
                        component = "gap_scanner",
                        event = "gap.cost_lookup.failed",
                        statistic_id = %cost_id,
                        hole_start = %hole_start,
                        error = %err
                    );
                    None
                }
            },
        };

        let hole = Hole {
            from_day: hole_start,
            to_day: self.cursor,
            from_ts_ms_utc: self.calendar.day_start_ms(hole_start),
            to_ts_ms_utc_exclusive: self.calendar.day_start_ms(self.cursor),
            last_sum,
            last_cost,
            next_ts_ms_utc,
        };

        info!(
            component = "gap_scanner",
            event = "gap.hole.found",
            statistic_id = %self.statistic_id,
            from = %hole.from_day,
            to = %hole.to_day,
            days = hole.days(),
            last_sum = hole.last_sum,
            last_cost = ?hole.last_cost
        );
        Ok(hole)
    }

    fn sum_before(
        &self,
        store: &mut dyn StatStore,
        statistic_id: &str,
        day: NaiveDate,
    ) -> Result<Option<f64>, StoreError> {
        let start = self.calendar.day_start_ms(previous_day(day));
        let end = self.calendar.day_start_ms(day);
        let points = store.statistics_during_period(statistic_id, start, end)?;
        Ok(points.last().map(|point| point.sum))
    }
}

pub struct Holes<'a> {
    scanner: GapScanner,
    store: &'a mut dyn StatStore,
}

impl Iterator for Holes<'_> {
    type Item = Result<Hole, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scanner.next_hole(self.store).transpose()
    }
}
