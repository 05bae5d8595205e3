//! Service configuration

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Reconciliation poller knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between two cycles
    pub period: Duration,
    /// Bound on a single oracle call, independent of `period`
    pub call_timeout: Duration,
    /// Maximum orders asked to the oracle per cycle
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            call_timeout: Duration::from_secs(3),
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL (env: DATABASE_URI)
    pub database_uri: String,
    /// Pool size shared by every component (env: DATABASE_MAX_CONNECTIONS)
    pub database_max_connections: u32,
    /// Base URL of the accrual oracle (env: ACCRUAL_SYSTEM_ADDRESS)
    pub accrual_system_address: String,
    pub poller: PollerConfig,
}

impl Config {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let defaults = PollerConfig::default();

        Ok(Self {
            database_uri: required("DATABASE_URI")?,
            database_max_connections: positive(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            accrual_system_address: required("ACCRUAL_SYSTEM_ADDRESS")?,
            poller: PollerConfig {
                period: Duration::from_secs(positive(
                    &lookup,
                    "POLL_INTERVAL",
                    defaults.period.as_secs(),
                )?),
                call_timeout: Duration::from_secs(positive(
                    &lookup,
                    "ORACLE_TIMEOUT",
                    defaults.call_timeout.as_secs(),
                )?),
                batch_size: positive(&lookup, "POLL_BATCH_SIZE", defaults.batch_size)?,
            },
        })
    }
}

/// Parse a strictly positive integer, falling back to `default` when unset
fn positive<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };

    let value = raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason: "not a number",
    })?;

    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "must be greater than zero",
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URI", "postgres://localhost/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", "http://localhost:8080"),
        ]))
        .unwrap();

        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.poller, PollerConfig::default());
        assert_eq!(config.poller.period, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URI", "postgres://localhost/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", "http://localhost:8080"),
            ("POLL_INTERVAL", "2"),
            ("ORACLE_TIMEOUT", "1"),
            ("POLL_BATCH_SIZE", " 25 "),
        ]))
        .unwrap();

        assert_eq!(config.poller.period, Duration::from_secs(2));
        assert_eq!(config.poller.call_timeout, Duration::from_secs(1));
        assert_eq!(config.poller.batch_size, 25);
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let err = Config::from_lookup(lookup(&[("ACCRUAL_SYSTEM_ADDRESS", "http://x")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URI"));

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URI", "postgres://localhost/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", ""),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("ACCRUAL_SYSTEM_ADDRESS"));

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URI", "postgres://localhost/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", "http://x"),
            ("POLL_INTERVAL", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "POLL_INTERVAL", .. }));

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URI", "postgres://localhost/loyalty"),
            ("ACCRUAL_SYSTEM_ADDRESS", "http://x"),
            ("POLL_BATCH_SIZE", "ten"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "POLL_BATCH_SIZE", .. }));
    }
}
