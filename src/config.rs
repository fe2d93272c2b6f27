//! Suite-wide knobs, read from `HSA_CTS_*` variables.

use std::time::Duration;
use thiserror::Error;

const THREADS_ENV: &str = "HSA_CTS_THREADS";
const ITERATIONS_ENV: &str = "HSA_CTS_ITERATIONS";
const WAIT_TIMEOUT_ENV: &str = "HSA_CTS_WAIT_TIMEOUT_MS";
const QUEUE_SIZE_ENV: &str = "HSA_CTS_QUEUE_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not a number")]
    NotANumber { key: &'static str, value: String },

    #[error("{key} must be at least {min}, got {value}")]
    TooSmall {
        key: &'static str,
        min: u64,
        value: u64,
    },

    #[error("{key} must be a power of two, got {value}")]
    NotPowerOfTwo { key: &'static str, value: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteConfig {
    /// Workers in every concurrent case.
    pub threads: usize,
    /// Rounds of the repeated experiments.
    pub iterations: usize,
    /// Upper bound on waits that are expected to be satisfied.
    pub wait_timeout: Duration,
    pub queue_size: u32,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            threads: 10,
            iterations: 32,
            wait_timeout: Duration::from_secs(10),
            queue_size: 64,
        }
    }
}

impl SuiteConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(threads) = read(&lookup, THREADS_ENV, 1)? {
            config.threads = threads as usize;
        }
        if let Some(iterations) = read(&lookup, ITERATIONS_ENV, 1)? {
            config.iterations = iterations as usize;
        }
        if let Some(ms) = read(&lookup, WAIT_TIMEOUT_ENV, 1)? {
            config.wait_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = read(&lookup, QUEUE_SIZE_ENV, 2)? {
            if !size.is_power_of_two() || size > u64::from(u32::MAX) {
                return Err(ConfigError::NotPowerOfTwo {
                    key: QUEUE_SIZE_ENV,
                    value: size,
                });
            }
            config.queue_size = size as u32;
        }
        Ok(config)
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_queue_size(mut self, size: u32) -> Self {
        self.queue_size = size;
        self
    }
}

fn read<F>(lookup: &F, key: &'static str, min: u64) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value = raw.trim().parse::<u64>().map_err(|_| ConfigError::NotANumber {
        key,
        value: raw.clone(),
    })?;
    if value < min {
        return Err(ConfigError::TooSmall { key, min, value });
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(key: &'static str, value: &'static str) -> impl Fn(&str) -> Option<String> {
        move |k| (k == key).then(|| value.to_string())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(
            SuiteConfig::from_lookup(|_| None).unwrap(),
            SuiteConfig::default()
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SuiteConfig::from_lookup(only(THREADS_ENV, " 4 ")).unwrap();
        assert_eq!(config.threads, 4);
        let config = SuiteConfig::from_lookup(only(WAIT_TIMEOUT_ENV, "250")).unwrap();
        assert_eq!(config.wait_timeout, Duration::from_millis(250));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_eq!(
            SuiteConfig::from_lookup(only(THREADS_ENV, "0")).unwrap_err(),
            ConfigError::TooSmall {
                key: THREADS_ENV,
                min: 1,
                value: 0
            }
        );
        assert!(matches!(
            SuiteConfig::from_lookup(only(ITERATIONS_ENV, "many")),
            Err(ConfigError::NotANumber { .. })
        ));
        assert!(matches!(
            SuiteConfig::from_lookup(only(QUEUE_SIZE_ENV, "100")),
            Err(ConfigError::NotPowerOfTwo { .. })
        ));
    }
}
