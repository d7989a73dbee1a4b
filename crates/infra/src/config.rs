//! Database configuration.
//!
//! Only connection settings live here. The tenant a store is bound to is
//! always supplied by the caller, never read from the environment.

use std::time::Duration;

use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection settings for [`PostgresStorage`](crate::backend::PostgresStorage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Read `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` and `DATABASE_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let mut config = Self::new(url);

        if let Some(raw) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = parse_number("DATABASE_MAX_CONNECTIONS", &raw)?;
            if config.max_connections == 0 {
                return Err(ConfigError::Invalid {
                    name: "DATABASE_MAX_CONNECTIONS",
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if let Some(raw) = lookup("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            let secs: u64 = parse_number("DATABASE_ACQUIRE_TIMEOUT_SECS", &raw)?;
            config.acquire_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse_number<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
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
    fn url_is_required() {
        let err = DatabaseConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));

        let err = DatabaseConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn defaults_apply_when_optional_values_are_absent() {
        let cfg = DatabaseConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/strike")])).unwrap();
        assert_eq!(cfg.url, "postgres://localhost/strike");
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
    }

    #[test]
    fn optional_values_are_parsed() {
        let cfg = DatabaseConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/strike"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("DATABASE_ACQUIRE_TIMEOUT_SECS", " 3 "),
        ]))
        .unwrap();
        assert_eq!(cfg.max_connections, 12);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(3));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = DatabaseConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/strike"),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DATABASE_MAX_CONNECTIONS", .. }));

        let err = DatabaseConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/strike"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { reason, .. } if reason.contains("at least 1")));
    }
}
