//! CSV source of daily meter readings.
//!
//! Rows are `date,value`. `date` is either a local calendar day (`YYYY-MM-DD`) or a
//! UTC millisecond timestamp, snapped to the start of its local day; `value` is the
//! day's energy in Wh. A first row with neither a date nor a number is a header.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use thiserror::Error;
use tracing::info;

use crate::calendar::DayCalendar;
use crate::Reading;

#[derive(Debug, Error)]
pub enum ReadingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("reading record has {found} columns, expected at least {expected}")]
    InvalidRecordColumns { found: usize, expected: usize },
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
}

pub fn load_readings_csv(
    path: &Path,
    calendar: &DayCalendar,
) -> Result<Vec<Reading>, ReadingsError> {
    let body = fs::read(path)?;
    let readings = parse_readings_csv(&body, calendar)?;
    info!(
        component = "readings",
        event = "readings.load.finish",
        path = %path.display(),
        readings = readings.len()
    );
    Ok(readings)
}

pub fn parse_readings_csv(
    body: &[u8],
    calendar: &DayCalendar,
) -> Result<Vec<Reading>, ReadingsError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let mut readings: Vec<Reading> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = idx as u64 + 1;
        if idx == 0 && is_header(&record, calendar) {
            continue;
        }
        readings.push(parse_reading_record(&record, calendar, line)?);
    }

    readings.sort_by_key(|reading| reading.ts_ms_utc);
    let mut deduped: Vec<Reading> = Vec::with_capacity(readings.len());
    for reading in readings {
        match deduped.last_mut() {
            Some(last) if last.ts_ms_utc == reading.ts_ms_utc => *last = reading,
            _ => deduped.push(reading),
        }
    }
    Ok(deduped)
}

fn is_header(record: &StringRecord, calendar: &DayCalendar) -> bool {
    let date_fails = record
        .get(0)
        .is_some_and(|raw| parse_timestamp(raw, calendar).is_none());
    let value_fails = record
        .get(1)
        .map_or(true, |raw| raw.parse::<f64>().is_err());
    date_fails && value_fails
}

fn parse_reading_record(
    record: &StringRecord,
    calendar: &DayCalendar,
    line: u64,
) -> Result<Reading, ReadingsError> {
    if record.len() < 2 {
        return Err(ReadingsError::InvalidRecordColumns {
            found: record.len(),
            expected: 2,
        });
    }

    let raw_date = record.get(0).unwrap_or_default();
    let ts_ms_utc =
        parse_timestamp(raw_date, calendar).ok_or_else(|| ReadingsError::ParseField {
            field: "date",
            value: raw_date.to_string(),
            line,
        })?;

    let raw_value = record.get(1).unwrap_or_default();
    let value = raw_value
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ReadingsError::ParseField {
            field: "value",
            value: raw_value.to_string(),
            line,
        })?;

    Ok(Reading { ts_ms_utc, value })
}

fn parse_timestamp(raw: &str, calendar: &DayCalendar) -> Option<i64> {
    let date = match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => date,
        Err(_) => calendar.date_of(raw.parse::<i64>().ok()?)?,
    };
    Some(calendar.day_start_ms(date))
}
