//! Tracing subscriber setup for suite runs.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: full tracing filter, takes precedence when set
//! - `HSA_CTS_LOG_LEVEL`: error, warn, info, debug or trace
//! - `HSA_CTS_LOG_FORMAT`: "human" or "json"
//! - `HSA_DEBUG`: any value raises the level to debug

use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

const LOG_LEVEL_ENV: &str = "HSA_CTS_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "HSA_CTS_LOG_FORMAT";
const DEBUG_ENV: &str = "HSA_DEBUG";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(s: &str) -> Result<Self, LoggingError> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLogLevel(s.to_string())),
        }
    }

    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Result<Self, LoggingError> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidLogFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Full filter directive; overrides `level` when present.
    pub filter: Option<String>,
    /// Worker threads are named, so naming them in logs tells rounds apart.
    pub with_thread_names: bool,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_thread_names(mut self, enabled: bool) -> Self {
        self.with_thread_names = enabled;
        self
    }

    pub fn from_env() -> Result<Self, LoggingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the same variables as [`LoggingConfig::from_env`] through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LoggingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new().with_thread_names(true);
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            config.level = LogLevel::parse(&level)?;
        }
        if lookup(DEBUG_ENV).is_some() {
            config.level = config.level.max(LogLevel::Debug);
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.format = LogFormat::parse(&format)?;
        }
        config.filter = lookup("RUST_LOG").filter(|f| !f.trim().is_empty());
        Ok(config)
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let directive = self
            .filter
            .as_deref()
            .unwrap_or_else(|| self.level.as_filter_str());
        EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
    }
}

/// Installs the subscriber described by the environment; later calls are
/// no-ops.
pub fn init_logging_default() {
    match LoggingConfig::from_env() {
        Ok(config) => {
            let _ = init_with_config(&config);
        }
        Err(e) => eprintln!("hsa-cts: ignoring logging configuration: {e}"),
    }
}

/// Installs a global subscriber once per process. Returns
/// `AlreadyInstalled` when some other subscriber got there first.
pub fn init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    let mut result = Ok(());
    TRACING_INITIALIZED.get_or_init(|| {
        result = install(config);
    });
    result
}

fn install(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Human => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(config.with_thread_names),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_names(config.with_thread_names),
            )
            .try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInstalled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_to_warn_and_human() {
        let config = LoggingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Human);
        assert!(config.filter.is_none());
    }

    #[test]
    fn hsa_debug_raises_but_never_lowers() {
        let config = LoggingConfig::from_lookup(lookup(&[(DEBUG_ENV, "1")])).unwrap();
        assert_eq!(config.level, LogLevel::Debug);

        let config = LoggingConfig::from_lookup(lookup(&[
            (DEBUG_ENV, "1"),
            (LOG_LEVEL_ENV, "trace"),
        ]))
        .unwrap();
        assert_eq!(config.level, LogLevel::Trace);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(matches!(
            LoggingConfig::from_lookup(lookup(&[(LOG_LEVEL_ENV, "loud")])),
            Err(LoggingError::InvalidLogLevel(_))
        ));
        assert!(matches!(
            LoggingConfig::from_lookup(lookup(&[(LOG_FORMAT_ENV, "xml")])),
            Err(LoggingError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn rust_log_overrides_level() {
        let config = LoggingConfig::from_lookup(lookup(&[
            ("RUST_LOG", "hsa_cts=trace"),
            (LOG_FORMAT_ENV, "json"),
        ]))
        .unwrap();
        assert_eq!(config.filter.as_deref(), Some("hsa_cts=trace"));
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.env_filter().is_ok());
    }
}
