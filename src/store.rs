//! Statistics store seam shared by the local and remote backends.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SeriesMetadata, StatPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatisticType {
    Sum,
    Mean,
}

impl StatisticType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store authentication failed: {0}")]
    Auth(String),
    #[error("store rejected {command}: {code}: {message}")]
    Rejected {
        command: String,
        code: String,
        message: String,
    },
    #[error("store protocol error: {0}")]
    Protocol(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unit mismatch for {statistic_id}: stored {stored}, requested {requested}")]
    UnitMismatch {
        statistic_id: String,
        stored: String,
        requested: String,
    },
    #[error("unsupported store schema version {0}")]
    UnsupportedSchema(i64),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
}

impl StoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Auth(_))
    }
}

// Every call blocks until the store answers; callers never overlap requests.
pub trait StatStore {
    // Half-open range, oldest first.
    fn statistics_during_period(
        &mut self,
        statistic_id: &str,
        start_ts_ms_utc: i64,
        end_ts_ms_utc_exclusive: i64,
    ) -> Result<Vec<StatPoint>, StoreError>;

    fn list_statistic_ids(
        &mut self,
        statistic_type: StatisticType,
    ) -> Result<BTreeSet<String>, StoreError>;

    fn import_statistics(
        &mut self,
        metadata: &SeriesMetadata,
        points: &[StatPoint],
    ) -> Result<(), StoreError>;

    fn adjust_sum(
        &mut self,
        statistic_id: &str,
        start_ts_ms_utc: i64,
        adjustment: f64,
        unit: &str,
    ) -> Result<(), StoreError>;

    fn clear_statistics(&mut self, statistic_ids: &[String]) -> Result<(), StoreError>;
}
