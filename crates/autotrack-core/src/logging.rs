//! Tracing subscriber setup for hosts embedding the runtime.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

use crate::config::TrackingConfig;

/// Initialize a global tracing subscriber with the given level and format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text. `RUST_LOG` takes precedence over
/// `level` when set. Returns an error if a global subscriber already exists.
pub fn init_tracing(level: &str, format: &str) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    }
}

/// [`init_tracing`] driven by a [`TrackingConfig`].
pub fn init_from_config(config: &TrackingConfig) -> Result<(), TryInitError> {
    init_tracing(&config.log_level, &config.log_format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_error_instead_of_panicking() {
        // Whichever call wins the race, the other must fail gracefully.
        let first = init_tracing("debug", "text");
        let second = init_from_config(&TrackingConfig::default());
        assert!(first.is_err() || second.is_err());
    }
}
