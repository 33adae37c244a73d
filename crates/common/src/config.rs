//! Typed lookup over a flat property bag, standing in for the auto-wiring a full framework would
//! otherwise do. Binding a [`Properties`] from the environment, a TOML file, or in-process
//! construction (as tests do) are all just "build a map" call sites.

use std::collections::HashMap;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key {0:?}")]
    Missing(String),
    #[error("configuration key {key:?} has invalid value {value:?}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    /// `application.server` is unset: this instance cannot name itself, and so cannot be routed
    /// to by its peers or serve local queries through the federated path.
    #[error("application.server is not configured; this instance cannot be routed to")]
    MissingSelfEndpoint,
}

/// A flat, string-keyed property bag.
#[derive(Clone, Debug, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn require_string(&self, key: &str) -> Result<&str, ConfigError> {
        self.get_string(key)
            .ok_or_else(|| ConfigError::Missing(key.to_owned()))
    }

    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_string(key).unwrap_or(default)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.get_string(key) {
            Some(v) => v.eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, ConfigError> {
        match self.get_string(key) {
            None => Ok(None),
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|e| self.invalid(key, v, e)),
        }
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        Ok(self.get_usize(key)?.unwrap_or(default))
    }

    pub fn get_duration_millis_or(
        &self,
        key: &str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        match self.get_usize(key)? {
            Some(ms) => Ok(Duration::from_millis(ms as u64)),
            None => Ok(default),
        }
    }

    pub fn get_regex(&self, key: &str) -> Result<Option<Regex>, ConfigError> {
        match self.get_string(key) {
            None => Ok(None),
            Some(v) => Regex::new(v).map(Some).map_err(|e| self.invalid(key, v, e)),
        }
    }

    fn invalid(&self, key: &str, value: &str, reason: impl ToString) -> ConfigError {
        ConfigError::Invalid {
            key: key.to_owned(),
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration keys recognized by this system, gathered in one place so the wiring code in
/// `main` and the tests reference a single source of truth rather than string literals scattered
/// about.
pub mod keys {
    pub const APPLICATION_SERVER: &str = "application.server";
    pub const NUM_STREAM_THREADS: &str = "num.stream.threads";
    pub const AUTOPILOT_ENABLED: &str = "autopilot.enabled";
    pub const AUTOPILOT_LAG_THRESHOLD: &str = "autopilot.lag.threshold";
    pub const AUTOPILOT_THREAD_LIMIT: &str = "autopilot.stream-thread.limit";
    pub const AUTOPILOT_INITIAL_DELAY_MS: &str = "autopilot.period.initial-delay";
    pub const AUTOPILOT_BETWEEN_RUNS_MS: &str = "autopilot.period.between-runs";
    pub const AUTOPILOT_EXCLUSION_PATTERN: &str = "autopilot.exclusion-pattern";
    pub const MAX_POLL_INTERVAL_MS: &str = "max.poll.interval.ms";
    pub const SESSION_TIMEOUT_MS: &str = "session.timeout.ms";
    pub const MANAGEMENT_ENDPOINTS_EXPOSE: &str = "management.endpoints.web.exposure.include";
}
