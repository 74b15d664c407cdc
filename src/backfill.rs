//! Fills scanner holes from meter readings and reconciles the running sums.

use thiserror::Error;
use tracing::{debug, info};

use crate::calendar::DayCalendar;
use crate::cost::{compute_costs, CostConfig};
use crate::gap_scanner::{GapScanner, Hole};
use crate::series::{
    accumulate_points, energy_samples, SeriesId, SeriesMetadata, DEFAULT_CURRENCY,
};
use crate::store::{StatStore, StoreError};
use crate::Reading;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct BackfillPlan {
    pub energy: SeriesId,
    pub calendar: DayCalendar,
    pub cost: Option<CostConfig>,
}

impl BackfillPlan {
    pub fn energy_metadata(&self) -> SeriesMetadata {
        self.energy.metadata(DEFAULT_CURRENCY)
    }

    pub fn cost_metadata(&self) -> Option<SeriesMetadata> {
        self.cost.as_ref().map(|cfg| {
            SeriesId::cost(self.energy.meter_id.clone(), self.energy.direction)
                .metadata(&cfg.currency)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub holes_found: usize,
    pub holes_filled: usize,
    pub holes_skipped: usize,
    pub points_written: usize,
    pub adjustments: usize,
}

// The first store error stops the run. Holes filled before it stay written.
pub fn backfill_holes(
    store: &mut dyn StatStore,
    mut scanner: GapScanner,
    readings: &[Reading],
    plan: &BackfillPlan,
) -> Result<BackfillReport, BackfillError> {
    let energy_meta = plan.energy_metadata();
    let cost = plan.cost.as_ref().zip(plan.cost_metadata());
    let mut report = BackfillReport::default();

    while let Some(hole) = scanner.next_hole(store)? {
        report.holes_found += 1;

        let covered: Vec<&Reading> = readings
            .iter()
            .filter(|reading| hole.contains(reading.ts_ms_utc))
            .collect();
        if covered.is_empty() {
            report.holes_skipped += 1;
            debug!(
                component = "backfill",
                event = "backfill.hole.skipped",
                statistic_id = %energy_meta.statistic_id,
                from = %hole.from_day,
                to = %hole.to_day
            );
            continue;
        }

        let energy = energy_samples(covered.iter().copied());
        write_hole(store, &energy_meta, &hole, energy, hole.last_sum, &mut report)?;

        if let (Some((cfg, cost_meta)), Some(last_cost)) = (&cost, hole.last_cost) {
            let costs = compute_costs(covered.iter().copied(), &plan.calendar, cfg);
            write_hole(store, cost_meta, &hole, costs, last_cost, &mut report)?;
        }

        report.holes_filled += 1;
    }

    info!(
        component = "backfill",
        event = "backfill.finish",
        statistic_id = %energy_meta.statistic_id,
        holes_found = report.holes_found,
        holes_filled = report.holes_filled,
        holes_skipped = report.holes_skipped,
        points_written = report.points_written,
        adjustments = report.adjustments
    );
    Ok(report)
}

fn write_hole(
    store: &mut dyn StatStore,
    metadata: &SeriesMetadata,
    hole: &Hole,
    samples: Vec<(i64, f64)>,
    baseline: f64,
    report: &mut BackfillReport,
) -> Result<(), StoreError> {
    let points = accumulate_points(samples, baseline);
    let Some(last) = points.last() else {
        return Ok(());
    };
    let adjustment = last.sum - baseline;

    store.import_statistics(metadata, &points)?;
    report.points_written += points.len();
    info!(
        component = "backfill",
        event = "backfill.hole.imported",
        statistic_id = %metadata.statistic_id,
        from = %hole.from_day,
        to = %hole.to_day,
        points = points.len(),
        baseline
    );

    store.adjust_sum(
        &metadata.statistic_id,
        hole.next_ts_ms_utc,
        adjustment,
        &metadata.unit,
    )?;
    report.adjustments += 1;
    info!(
        component = "backfill",
        event = "backfill.adjust",
        statistic_id = %metadata.statistic_id,
        start_ts_ms_utc = hole.next_ts_ms_utc,
        adjustment
    );
    Ok(())
}
