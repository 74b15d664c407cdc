//! Logging configuration and initialization shared by the binaries.
//!
//! Events go to stderr so that audit output on stdout stays machine-readable.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_target: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

// `STATFILL_LOG_LEVEL` takes any `EnvFilter` directive and falls back to `RUST_LOG`.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    let level = ["STATFILL_LOG_LEVEL", "RUST_LOG"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .map(|raw| raw.trim().to_string())
        .find(|raw| !raw.is_empty());
    if let Some(level) = level {
        config.level = level;
    }

    if let Ok(format) = env::var("STATFILL_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("STATFILL_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.compact().finish())?,
    }

    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        log_format = ?config.format
    );
}

pub fn log_store_selected(component: &'static str, store: &str, location: &str) {
    info!(component, event = "store.selected", store, location);
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" | "text" => Some(LogFormat::Compact),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const LOG_VARS: [&str; 4] = [
        "STATFILL_LOG_LEVEL",
        "RUST_LOG",
        "STATFILL_LOG_FORMAT",
        "STATFILL_LOG_TARGET",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_log_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(&str, Option<String>)> = LOG_VARS
            .iter()
            .map(|key| (*key, env::var(key).ok()))
            .collect();

        for key in LOG_VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_log_env(&[], logging_config_from_env);
        assert_eq!(cfg, LoggingConfig::default());
        assert_eq!(cfg.format, LogFormat::Compact);
    }

    #[test]
    fn own_level_wins_over_rust_log() {
        let cfg = with_log_env(
            &[
                ("STATFILL_LOG_LEVEL", "statfill=debug"),
                ("RUST_LOG", "warn"),
                ("STATFILL_LOG_FORMAT", "JSON"),
                ("STATFILL_LOG_TARGET", "on"),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "statfill=debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.include_target);
    }

    #[test]
    fn rust_log_is_used_when_own_level_is_blank() {
        let cfg = with_log_env(
            &[("STATFILL_LOG_LEVEL", "  "), ("RUST_LOG", "trace")],
            logging_config_from_env,
        );
        assert_eq!(cfg.level, "trace");
    }

    #[test]
    fn unknown_format_or_target_keeps_defaults() {
        let cfg = with_log_env(
            &[("STATFILL_LOG_FORMAT", "yaml"), ("STATFILL_LOG_TARGET", "maybe")],
            logging_config_from_env,
        );

        assert_eq!(cfg.format, LogFormat::Compact);
        assert!(!cfg.include_target);
    }
}
