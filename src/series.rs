//! Series identifiers, statistic points and external readings.

use serde::{Deserialize, Serialize};

pub const STATISTIC_SOURCE: &str = "meter";
pub const ENERGY_UNIT: &str = "kWh";
pub const DEFAULT_CURRENCY: &str = "EUR";
pub const WH_PER_KWH: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Consumption,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesKind {
    Energy,
    Cost,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesId {
    pub meter_id: String,
    pub direction: Direction,
    pub kind: SeriesKind,
}

impl SeriesId {
    pub fn new(meter_id: impl Into<String>, direction: Direction, kind: SeriesKind) -> Self {
        Self {
            meter_id: meter_id.into(),
            direction,
            kind,
        }
    }

    pub fn energy(meter_id: impl Into<String>, direction: Direction) -> Self {
        Self::new(meter_id, direction, SeriesKind::Energy)
    }

    pub fn cost(meter_id: impl Into<String>, direction: Direction) -> Self {
        Self::new(meter_id, direction, SeriesKind::Cost)
    }

    pub fn statistic_id(&self) -> String {
        let production = match self.direction {
            Direction::Consumption => "",
            Direction::Production => "_production",
        };
        let cost = match self.kind {
            SeriesKind::Energy => "",
            SeriesKind::Cost => "_cost",
        };
        format!("{STATISTIC_SOURCE}:{}{production}{cost}", self.meter_id)
    }

    pub fn display_name(&self) -> String {
        let what = match (self.direction, self.kind) {
            (Direction::Consumption, SeriesKind::Energy) => "consumption",
            (Direction::Production, SeriesKind::Energy) => "production",
            (Direction::Consumption, SeriesKind::Cost) => "consumption cost",
            (Direction::Production, SeriesKind::Cost) => "production revenue",
        };
        format!("Meter {} {what}", self.meter_id)
    }

    pub fn metadata(&self, currency: &str) -> SeriesMetadata {
        let unit = match self.kind {
            SeriesKind::Energy => ENERGY_UNIT,
            SeriesKind::Cost => currency,
        };
        SeriesMetadata {
            statistic_id: self.statistic_id(),
            source: STATISTIC_SOURCE.to_string(),
            name: self.display_name(),
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub statistic_id: String,
    pub source: String,
    pub name: String,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatPoint {
    pub start_ts_ms_utc: i64,
    pub state: Option<f64>,
    pub sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ts_ms_utc: i64,
    pub value: f64,
}

pub fn accumulate_points(
    samples: impl IntoIterator<Item = (i64, f64)>,
    baseline: f64,
) -> Vec<StatPoint> {
    let mut sum = baseline;
    samples
        .into_iter()
        .map(|(start_ts_ms_utc, amount)| {
            sum += amount;
            StatPoint {
                start_ts_ms_utc,
                state: Some(amount),
                sum,
            }
        })
        .collect()
}

pub fn energy_samples<'a>(readings: impl IntoIterator<Item = &'a Reading>) -> Vec<(i64, f64)> {
    readings
        .into_iter()
        .map(|reading| (reading.ts_ms_utc, reading.value / WH_PER_KWH))
        .collect()
}
