//! Price rules turning daily energy readings into daily cost amounts.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::DayCalendar;
use crate::series::{Reading, DEFAULT_CURRENCY, WH_PER_KWH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRule {
    pub price_per_kwh: f64,
    #[serde(default)]
    pub start_date: Option<String>,
    // Exclusive.
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub weekdays: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    pub rules: Vec<PriceRule>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl CostConfig {
    pub fn flat(price_per_kwh: f64, currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            rules: vec![PriceRule {
                price_per_kwh,
                start_date: None,
                end_date: None,
                weekdays: None,
            }],
        }
    }

    pub fn price_on(&self, day: NaiveDate) -> Option<f64> {
        self.rules
            .iter()
            .find(|rule| rule.applies_on(day))
            .map(|rule| rule.price_per_kwh)
    }
}

impl PriceRule {
    pub fn applies_on(&self, day: NaiveDate) -> bool {
        if let Some(start) = self.start_date.as_deref().and_then(parse_date) {
            if day < start {
                return false;
            }
        }
        if let Some(end) = self.end_date.as_deref().and_then(parse_date) {
            if day >= end {
                return false;
            }
        }
        match &self.weekdays {
            Some(days) => days
                .iter()
                .filter_map(|raw| raw.parse::<Weekday>().ok())
                .any(|weekday| weekday == day.weekday()),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for raw in self.start_date.iter().chain(self.end_date.iter()) {
            if parse_date(raw).is_none() {
                return Err(format!("invalid rule date '{raw}', expected YYYY-MM-DD"));
            }
        }
        for raw in self.weekdays.iter().flatten() {
            if raw.parse::<Weekday>().is_err() {
                return Err(format!("invalid rule weekday '{raw}'"));
            }
        }
        if !self.price_per_kwh.is_finite() {
            return Err("price_per_kwh must be finite".to_string());
        }
        Ok(())
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn compute_costs<'a>(
    readings: impl IntoIterator<Item = &'a Reading>,
    calendar: &DayCalendar,
    cfg: &CostConfig,
) -> Vec<(i64, f64)> {
    let mut out = Vec::new();
    for reading in readings {
        let Some(day) = calendar.date_of(reading.ts_ms_utc) else {
            continue;
        };
        match cfg.price_on(day) {
            Some(price) => out.push((reading.ts_ms_utc, reading.value / WH_PER_KWH * price)),
            None => debug!(
                component = "cost",
                event = "cost.price.missing",
                day = %day
            ),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rule(
        price: f64,
        start: Option<&str>,
        end: Option<&str>,
        weekdays: Option<&[&str]>,
    ) -> PriceRule {
        PriceRule {
            price_per_kwh: price,
            start_date: start.map(str::to_string),
            end_date: end.map(str::to_string),
            weekdays: weekdays.map(|days| days.iter().map(|d| d.to_string()).collect()),
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let cfg = CostConfig {
            currency: "EUR".to_string(),
            rules: vec![
                rule(0.5, None, None, Some(&["Sat", "Sun"])),
                rule(0.25, Some("2025-01-01"), Some("2025-02-01"), None),
                rule(0.2, None, None, None),
            ],
        };

        // 2025-01-04 is a Saturday.
        assert_eq!(cfg.price_on(date(2025, 1, 4)), Some(0.5));
        assert_eq!(cfg.price_on(date(2025, 1, 6)), Some(0.25));
        assert_eq!(cfg.price_on(date(2025, 2, 3)), Some(0.2));
    }

    #[test]
    fn end_date_is_exclusive_and_uncovered_days_have_no_price() {
        let cfg = CostConfig {
            currency: "EUR".to_string(),
            rules: vec![rule(0.25, Some("2025-01-01"), Some("2025-02-01"), None)],
        };

        assert_eq!(cfg.price_on(date(2025, 1, 31)), Some(0.25));
        assert_eq!(cfg.price_on(date(2025, 2, 1)), None);
        assert_eq!(cfg.price_on(date(2024, 12, 31)), None);
    }

    #[test]
    fn compute_costs_skips_unpriced_days() {
        let cal = DayCalendar::new(chrono_tz::UTC);
        let cfg = CostConfig {
            currency: "EUR".to_string(),
            rules: vec![rule(0.5, Some("2025-01-02"), None, None)],
        };
        let readings = [
            Reading {
                ts_ms_utc: cal.day_start_ms(date(2025, 1, 1)),
                value: 4_000.0,
            },
            Reading {
                ts_ms_utc: cal.day_start_ms(date(2025, 1, 2)),
                value: 6_000.0,
            },
        ];

        let costs = compute_costs(&readings, &cal, &cfg);
        assert_eq!(costs, vec![(cal.day_start_ms(date(2025, 1, 2)), 3.0)]);
    }

    #[test]
    fn validate_flags_bad_rule_fields() {
        assert!(rule(0.2, Some("2025-13-01"), None, None).validate().is_err());
        assert!(rule(0.2, None, None, Some(&["Funday"])).validate().is_err());
        assert!(rule(f64::NAN, None, None, None).validate().is_err());
        assert!(rule(0.2, Some("2025-01-01"), None, Some(&["mon"])).validate().is_ok());
    }

    #[test]
    fn rules_deserialize_with_default_currency() {
        let cfg: CostConfig = serde_json::from_str(
            r#"{ "rules": [ { "price_per_kwh": 0.2516, "weekdays": ["Mon", "Tue"] } ] }"#,
        )
        .unwrap();
        assert_eq!(cfg.currency, "EUR");
        assert_eq!(cfg.rules[0].weekdays.as_ref().unwrap().len(), 2);
    }
}
