//! One full pass over a meter: initial import, gap backfill and tail append.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::backfill::{backfill_holes, BackfillError, BackfillPlan, BackfillReport};
use crate::calendar::{next_day, DayCalendar};
use crate::cost::compute_costs;
use crate::gap_scanner::GapScanner;
use crate::locator::locate_latest_point;
use crate::series::{accumulate_points, energy_samples, Direction, SeriesId, SeriesMetadata};
use crate::store::{StatStore, StatisticType, StoreError};
use crate::{Reading, StatPoint};

#[derive(Debug, Clone)]
pub struct SyncRequest<'a> {
    pub plan: BackfillPlan,
    pub readings: &'a [Reading],
    pub start_day: Option<NaiveDate>,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub energy_created: bool,
    pub cost_created: bool,
    pub backfill: BackfillReport,
    pub initial_points: usize,
    pub tail_points: usize,
}

pub fn sync_meter(
    store: &mut dyn StatStore,
    request: &SyncRequest<'_>,
) -> Result<SyncReport, BackfillError> {
    let plan = &request.plan;
    let calendar = &plan.calendar;
    let readings: Vec<Reading> = before_today(request.readings, calendar, request.today);
    let energy_meta = plan.energy_metadata();
    let cost_meta = plan.cost_metadata();
    let known = store.list_statistic_ids(StatisticType::Sum)?;
    let mut report = SyncReport::default();

    info!(
        component = "sync",
        event = "sync.start",
        statistic_id = %energy_meta.statistic_id,
        readings = readings.len(),
        today = %request.today,
        cost = cost_meta.is_some()
    );

    if known.contains(&energy_meta.statistic_id) {
        let cost_id = cost_meta
            .as_ref()
            .filter(|meta| known.contains(&meta.statistic_id))
            .map(|meta| meta.statistic_id.clone());
        if let Some(scanner) = GapScanner::anchored(
            store,
            &energy_meta.statistic_id,
            cost_id,
            *calendar,
            request.start_day,
            request.today,
        )? {
            report.backfill = backfill_holes(store, scanner, &readings, plan)?;
        }

        let samples = |after: &[Reading]| energy_samples(after);
        report.tail_points +=
            append_tail(store, &energy_meta, &readings, calendar, request.today, samples)?;
    } else {
        warn!(
            component = "sync",
            event = "sync.series.new",
            statistic_id = %energy_meta.statistic_id
        );
        let points = accumulate_points(energy_samples(&readings), 0.0);
        report.initial_points += import(store, &energy_meta, &points)?;
        report.energy_created = true;
    }

    if let (Some(cfg), Some(meta)) = (&plan.cost, &cost_meta) {
        let costs = |after: &[Reading]| compute_costs(after, calendar, cfg);
        if known.contains(&meta.statistic_id) {
            report.tail_points +=
                append_tail(store, meta, &readings, calendar, request.today, costs)?;
        } else {
            let points = accumulate_points(costs(&readings), 0.0);
            report.initial_points += import(store, meta, &points)?;
            report.cost_created = true;
        }
    }

    info!(
        component = "sync",
        event = "sync.finish",
        statistic_id = %energy_meta.statistic_id,
        energy_created = report.energy_created,
        cost_created = report.cost_created,
        holes_filled = report.backfill.holes_filled,
        initial_points = report.initial_points,
        tail_points = report.tail_points
    );
    Ok(report)
}

pub fn purge_meter(
    store: &mut dyn StatStore,
    meter_id: &str,
    direction: Direction,
) -> Result<Vec<String>, StoreError> {
    let ids = vec![
        SeriesId::energy(meter_id, direction).statistic_id(),
        SeriesId::cost(meter_id, direction).statistic_id(),
    ];
    store.clear_statistics(&ids)?;
    warn!(
        component = "sync",
        event = "sync.purge",
        meter_id,
        statistic_ids = ?ids
    );
    Ok(ids)
}

fn before_today(readings: &[Reading], calendar: &DayCalendar, today: NaiveDate) -> Vec<Reading> {
    let today_start = calendar.day_start_ms(today);
    readings
        .iter()
        .filter(|reading| reading.ts_ms_utc < today_start)
        .copied()
        .collect()
}

// A known series with nothing inside the lookback horizon restarts from zero.
fn append_tail(
    store: &mut dyn StatStore,
    metadata: &SeriesMetadata,
    readings: &[Reading],
    calendar: &DayCalendar,
    today: NaiveDate,
    samples: impl Fn(&[Reading]) -> Vec<(i64, f64)>,
) -> Result<usize, StoreError> {
    let latest = locate_latest_point(store, &metadata.statistic_id, calendar, today)?;
    let (baseline, tail_start) = match latest {
        Some(point) => {
            let day = calendar
                .date_of(point.start_ts_ms_utc)
                .ok_or(StoreError::InvalidTimestamp(point.start_ts_ms_utc))?;
            (point.sum, calendar.day_start_ms(next_day(day)))
        }
        None => {
            warn!(
                component = "sync",
                event = "sync.tail.no_latest_point",
                statistic_id = %metadata.statistic_id
            );
            (0.0, i64::MIN)
        }
    };

    let tail: Vec<Reading> = readings
        .iter()
        .filter(|reading| reading.ts_ms_utc >= tail_start)
        .copied()
        .collect();
    let points = accumulate_points(samples(&tail), baseline);
    import(store, metadata, &points)
}

fn import(
    store: &mut dyn StatStore,
    metadata: &SeriesMetadata,
    points: &[StatPoint],
) -> Result<usize, StoreError> {
    if points.is_empty() {
        return Ok(0);
    }
    store.import_statistics(metadata, points)?;
    info!(
        component = "sync",
        event = "sync.import",
        statistic_id = %metadata.statistic_id,
        points = points.len(),
        first_ts_ms_utc = points[0].start_ts_ms_utc,
        last_sum = points[points.len() - 1].sum
    );
    Ok(points.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostConfig;
    use crate::SqliteStatStore;

    fn cal() -> DayCalendar {
        DayCalendar::new(chrono_tz::UTC)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap()
    }

    fn ts(d: u32) -> i64 {
        cal().day_start_ms(date(d))
    }

    fn readings(days: impl IntoIterator<Item = u32>) -> Vec<Reading> {
        days.into_iter()
            .map(|d| Reading {
                ts_ms_utc: ts(d),
                value: 1_000.0 * f64::from(d),
            })
            .collect()
    }

    fn plan(cost: Option<CostConfig>) -> BackfillPlan {
        BackfillPlan {
            energy: SeriesId::energy("sync", Direction::Consumption),
            calendar: cal(),
            cost,
        }
    }

    fn points(store: &mut SqliteStatStore, id: &str) -> Vec<StatPoint> {
        store.statistics_during_period(id, ts(1), ts(31)).unwrap()
    }

    #[test]
    fn new_series_is_imported_from_zero_up_to_yesterday() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let readings = readings(1..=5);
        let request = SyncRequest {
            plan: plan(Some(CostConfig::flat(0.5, "EUR"))),
            readings: &readings,
            start_day: None,
            today: date(5),
        };

        let report = sync_meter(&mut store, &request).unwrap();

        assert!(report.energy_created);
        assert!(report.cost_created);
        assert_eq!(report.initial_points, 8);

        let energy = points(&mut store, "meter:sync");
        assert_eq!(energy.len(), 4);
        assert_eq!(energy.last().unwrap().sum, 10.0);
        let cost = points(&mut store, "meter:sync_cost");
        assert_eq!(cost.last().unwrap().sum, 5.0);
    }

    #[test]
    fn existing_series_gets_holes_filled_and_tail_appended() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let plan = plan(None);
        let seeded = vec![
            StatPoint {
                start_ts_ms_utc: ts(1),
                state: Some(1.0),
                sum: 1.0,
            },
            StatPoint {
                start_ts_ms_utc: ts(4),
                state: Some(4.0),
                sum: 5.0,
            },
        ];
        store
            .import_statistics(&plan.energy_metadata(), &seeded)
            .unwrap();

        let readings = readings(1..=7);
        let request = SyncRequest {
            plan,
            readings: &readings,
            start_day: None,
            today: date(7),
        };
        let report = sync_meter(&mut store, &request).unwrap();

        assert!(!report.energy_created);
        assert_eq!(report.backfill.holes_filled, 1);
        assert_eq!(report.tail_points, 2);

        let sums: Vec<f64> = points(&mut store, "meter:sync")
            .iter()
            .map(|p| p.sum)
            .collect();
        assert_eq!(sums, vec![1.0, 3.0, 6.0, 10.0, 15.0, 21.0]);
    }

    #[test]
    fn purge_clears_energy_and_cost() {
        let mut store = SqliteStatStore::open_in_memory().unwrap();
        let readings = readings(1..=3);
        let request = SyncRequest {
            plan: plan(Some(CostConfig::flat(0.5, "EUR"))),
            readings: &readings,
            start_day: None,
            today: date(4),
        };
        sync_meter(&mut store, &request).unwrap();

        let cleared = purge_meter(&mut store, "sync", Direction::Consumption).unwrap();

        assert_eq!(cleared, vec!["meter:sync", "meter:sync_cost"]);
        assert!(store
            .list_statistic_ids(StatisticType::Sum)
            .unwrap()
            .is_empty());
    }
}
