//! Runtime configuration.
//!
//! Provides [`TrackingConfig`] with defaults for subscription diagnostics,
//! logging, and persistence. Values can be overridden from `AUTOTRACK_*`
//! environment variables.

use crate::error::ConfigError;
use crate::store::PersistOptions;

pub const ENV_LOG_SUBSCRIPTIONS: &str = "AUTOTRACK_LOG_SUBSCRIPTIONS";
pub const ENV_LOG_LEVEL: &str = "AUTOTRACK_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "AUTOTRACK_LOG_FORMAT";
pub const ENV_PERSIST_VERSION: &str = "AUTOTRACK_PERSIST_VERSION";
pub const ENV_MAP_SET_HANDLING: &str = "AUTOTRACK_MAP_SET_HANDLING";

/// Configuration for the tracking runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Log every minimal subscription set when it is built.
    pub log_subscriptions: bool,
    /// Log level filter string (e.g. "info", "debug", "autotrack_proxy=trace").
    pub log_level: String,
    /// Log output format: "text" or "json".
    pub log_format: String,
    /// Version stamped on persisted envelopes.
    pub persist_version: u32,
    /// Encode `Map`/`Set` values when persisting.
    pub map_set_handling: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            log_subscriptions: false,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            persist_version: 0,
            map_set_handling: true,
        }
    }
}

impl TrackingConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_LOG_SUBSCRIPTIONS) {
            cfg.log_subscriptions = parse_bool(ENV_LOG_SUBSCRIPTIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            cfg.log_level = raw;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            match raw.as_str() {
                "text" | "json" => cfg.log_format = raw,
                _ => return Err(invalid(ENV_LOG_FORMAT, &raw)),
            }
        }
        if let Some(raw) = lookup(ENV_PERSIST_VERSION) {
            cfg.persist_version = raw
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_PERSIST_VERSION, &raw))?;
        }
        if let Some(raw) = lookup(ENV_MAP_SET_HANDLING) {
            cfg.map_set_handling = parse_bool(ENV_MAP_SET_HANDLING, &raw)?;
        }

        Ok(cfg)
    }

    /// Persistence options for a store named `name`.
    pub fn persist_options(&self, name: impl Into<String>) -> PersistOptions {
        PersistOptions {
            name: name.into(),
            version: self.persist_version,
            map_set_handling: self.map_set_handling,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
