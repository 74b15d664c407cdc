//! Statistics backfill core.
//!
//! Current implemented scope:
//! - day calendar and series identifiers for daily cumulative meter statistics
//! - SQLite and recorder-command store backends behind one `StatStore` seam
//! - gap scanning, hole backfill with sum reconciliation, and tail sync per meter

mod backfill;
mod calendar;
mod config;
mod cost;
mod gap_scanner;
mod locator;
mod observability;
mod readings;
mod remote_store;
mod series;
mod sqlite_store;
mod store;
mod sync;

pub use backfill::{backfill_holes, BackfillError, BackfillPlan, BackfillReport};
pub use calendar::{days_before, next_day, previous_day, DayCalendar};
pub use config::{
    backfill_config_from_env, BackfillConfig, ConfigError, StoreTarget, DEFAULT_HTTP_TIMEOUT_MS,
    DEFAULT_STORE_PATH, DEFAULT_TIMEZONE,
};
pub use cost::{compute_costs, CostConfig, PriceRule};
pub use gap_scanner::{GapScanner, Hole, Holes};
pub use locator::{
    locate_latest_point, locate_oldest_point, LOOKBACK_BLOCK_DAYS, LOOKBACK_MAX_BLOCKS,
};
pub use observability::{
    init_logging, log_app_start, log_store_selected, logging_config_from_env, LogFormat,
    LoggingConfig, LoggingInitError,
};
pub use readings::{load_readings_csv, parse_readings_csv, ReadingsError};
pub use remote_store::{CommandTransport, HttpCommandTransport, RemoteStatClient};
pub use series::{
    accumulate_points, energy_samples, Direction, Reading, SeriesId, SeriesKind, SeriesMetadata,
    StatPoint, DEFAULT_CURRENCY, ENERGY_UNIT, STATISTIC_SOURCE, WH_PER_KWH,
};
pub use sqlite_store::SqliteStatStore;
pub use store::{StatStore, StatisticType, StoreError};
pub use sync::{purge_meter, sync_meter, SyncReport, SyncRequest};
