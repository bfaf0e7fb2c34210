//! Server configuration.

use std::time::Duration;

/// Settings for the API binary, read from the environment at startup.
///
/// - `HOST` (default `0.0.0.0`) and `PORT` (default `3000`) form the bind
///   address.
/// - `SWEEP_INTERVAL_SECS` (default `60`) paces the background sweep that
///   drives timeout cancellation, delivery promotion, and graced settlement.
///
/// Tracing verbosity comes from `RUST_LOG` via the env-filter, not from
/// here.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub sweep_interval: Duration,
}

impl Config {
    /// Reads the environment, falling back to defaults for anything unset
    /// or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            sweep_interval: env_parse("SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
