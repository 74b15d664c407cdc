//! Run configuration read from `STATFILL_*` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

use crate::calendar::DayCalendar;
use crate::cost::CostConfig;
use crate::observability::{log_store_selected, parse_bool};
use crate::remote_store::{HttpCommandTransport, RemoteStatClient};
use crate::series::{Direction, DEFAULT_CURRENCY};
use crate::sqlite_store::SqliteStatStore;
use crate::store::{StatStore, StoreError};

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Paris;
pub const DEFAULT_STORE_PATH: &str = "data/statfill.sqlite";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Sqlite {
        path: PathBuf,
    },
    Remote {
        url: String,
        token: String,
        timeout_ms: u64,
    },
}

impl StoreTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "sqlite",
            Self::Remote { .. } => "remote",
        }
    }

    pub fn open(&self, component: &'static str) -> Result<Box<dyn StatStore>, StoreError> {
        match self {
            Self::Sqlite { path } => {
                let store = SqliteStatStore::open(path)?;
                log_store_selected(component, self.kind(), &path.display().to_string());
                Ok(Box::new(store))
            }
            Self::Remote {
                url,
                token,
                timeout_ms,
            } => {
                let transport =
                    HttpCommandTransport::new(url.as_str(), token.as_str(), *timeout_ms)?;
                log_store_selected(component, self.kind(), url);
                warn!(
                    component,
                    event = "store.remote.http_bridge",
                    url = %url,
                    "remote store expects an HTTP bridge in front of the recorder websocket"
                );
                Ok(Box::new(RemoteStatClient::new(transport)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillConfig {
    pub meter_id: String,
    pub direction: Direction,
    pub timezone: Tz,
    pub start_date: Option<NaiveDate>,
    pub readings_csv: Option<PathBuf>,
    pub store: StoreTarget,
    pub cost: Option<CostConfig>,
    pub purge: bool,
}

impl BackfillConfig {
    pub fn calendar(&self) -> DayCalendar {
        DayCalendar::new(self.timezone)
    }

    pub fn readings_path(&self) -> Result<&Path, ConfigError> {
        self.readings_csv
            .as_deref()
            .ok_or(ConfigError::Missing("STATFILL_READINGS_CSV"))
    }
}

pub fn backfill_config_from_env() -> Result<BackfillConfig, ConfigError> {
    let meter_id =
        non_empty_var("STATFILL_METER_ID").ok_or(ConfigError::Missing("STATFILL_METER_ID"))?;

    let direction = match non_empty_var("STATFILL_PRODUCTION") {
        Some(raw) => match parse_bool(&raw) {
            Some(true) => Direction::Production,
            Some(false) => Direction::Consumption,
            None => return Err(invalid("STATFILL_PRODUCTION", raw, "expected a boolean")),
        },
        None => Direction::Consumption,
    };

    let timezone = match non_empty_var("STATFILL_TIMEZONE") {
        Some(raw) => match raw.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => return Err(invalid("STATFILL_TIMEZONE", raw, "unknown IANA timezone")),
        },
        None => DEFAULT_TIMEZONE,
    };

    let start_date = match non_empty_var("STATFILL_START_DATE") {
        Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(err) => return Err(invalid("STATFILL_START_DATE", raw, err.to_string())),
        },
        None => None,
    };

    let purge = match non_empty_var("STATFILL_PURGE") {
        Some(raw) => match parse_bool(&raw) {
            Some(value) => value,
            None => return Err(invalid("STATFILL_PURGE", raw, "expected a boolean")),
        },
        None => false,
    };

    Ok(BackfillConfig {
        meter_id,
        direction,
        timezone,
        start_date,
        readings_csv: non_empty_var("STATFILL_READINGS_CSV").map(PathBuf::from),
        store: store_target_from_env()?,
        cost: cost_config_from_env()?,
        purge,
    })
}

fn store_target_from_env() -> Result<StoreTarget, ConfigError> {
    let Some(url) = non_empty_var("STATFILL_REMOTE_URL") else {
        let path = non_empty_var("STATFILL_STORE_PATH")
            .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string());
        return Ok(StoreTarget::Sqlite {
            path: PathBuf::from(path),
        });
    };

    let token = non_empty_var("STATFILL_REMOTE_TOKEN")
        .ok_or(ConfigError::Missing("STATFILL_REMOTE_TOKEN"))?;
    let timeout_ms = match non_empty_var("STATFILL_HTTP_TIMEOUT_MS") {
        Some(raw) => match raw.parse::<u64>() {
            Ok(ms) if ms > 0 => ms,
            _ => {
                return Err(invalid(
                    "STATFILL_HTTP_TIMEOUT_MS",
                    raw,
                    "expected a positive integer",
                ))
            }
        },
        None => DEFAULT_HTTP_TIMEOUT_MS,
    };

    Ok(StoreTarget::Remote {
        url,
        token,
        timeout_ms,
    })
}

fn cost_config_from_env() -> Result<Option<CostConfig>, ConfigError> {
    let price = non_empty_var("STATFILL_COST_PRICE");
    let rules = non_empty_var("STATFILL_COST_RULES");
    let currency = non_empty_var("STATFILL_COST_CURRENCY");

    match (price, rules) {
        (Some(_), Some(rules)) => Err(invalid(
            "STATFILL_COST_RULES",
            rules,
            "set either STATFILL_COST_PRICE or STATFILL_COST_RULES, not both",
        )),
        (Some(raw), None) => match raw.parse::<f64>() {
            Ok(price) if price.is_finite() => Ok(Some(CostConfig::flat(
                price,
                currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            ))),
            _ => Err(invalid("STATFILL_COST_PRICE", raw, "expected a number")),
        },
        (None, Some(path)) => {
            let mut cfg = load_cost_rules(&path)?;
            if let Some(currency) = currency {
                cfg.currency = currency;
            }
            Ok(Some(cfg))
        }
        (None, None) => Ok(None),
    }
}

fn load_cost_rules(path: &str) -> Result<CostConfig, ConfigError> {
    let body = fs::read_to_string(path)
        .map_err(|err| invalid("STATFILL_COST_RULES", path, err.to_string()))?;
    let cfg: CostConfig = serde_json::from_str(&body)
        .map_err(|err| invalid("STATFILL_COST_RULES", path, err.to_string()))?;
    if cfg.rules.is_empty() {
        return Err(invalid("STATFILL_COST_RULES", path, "no price rules"));
    }
    for rule in &cfg.rules {
        rule.validate()
            .map_err(|reason| invalid("STATFILL_COST_RULES", path, reason))?;
    }
    Ok(cfg)
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn invalid(var: &'static str, value: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.into(),
        reason: reason.into(),
    }
}
