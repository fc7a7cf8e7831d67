//! Store connection configuration.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_URL: &str = "redis://localhost:6379";
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_DB: i64 = 0;
pub const DEFAULT_CONN_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must be set")]
    Missing { var: &'static str },
}

/// Connection settings for a remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection URL
    pub url: String,
    /// Maximum idle command connections kept for reuse
    pub pool_size: usize,
    /// Logical database index
    pub db: i64,
    /// Connection attempts before giving up at startup
    pub conn_attempts: u32,
    /// Per-attempt connect timeout, also the pause between attempts
    pub conn_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            db: DEFAULT_DB,
            conn_attempts: DEFAULT_CONN_ATTEMPTS,
            conn_timeout: DEFAULT_CONN_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Read settings from the process environment.
    ///
    /// `REDIS_URL`, `REDIS_POOL_SIZE`, `REDIS_DB`, `REDIS_CONN_ATTEMPTS` and
    /// `REDIS_CONN_TIMEOUT_MS` override the defaults when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`StoreConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup("REDIS_URL") {
            config.url = url;
        }
        if let Some(v) = parse_var(&lookup, "REDIS_POOL_SIZE")? {
            config.pool_size = v;
        }
        if let Some(v) = parse_var(&lookup, "REDIS_DB")? {
            config.db = v;
        }
        if let Some(v) = parse_var(&lookup, "REDIS_CONN_ATTEMPTS")? {
            config.conn_attempts = v;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "REDIS_CONN_TIMEOUT_MS")? {
            config.conn_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_conn_attempts(mut self, attempts: u32) -> Self {
        self.conn_attempts = attempts;
        self
    }

    pub fn with_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = timeout;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
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
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.conn_attempts, 10);
        assert_eq!(config.conn_timeout, Duration::from_secs(1));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache:6380"),
            ("REDIS_POOL_SIZE", "4"),
            ("REDIS_DB", "2"),
            ("REDIS_CONN_ATTEMPTS", "3"),
            ("REDIS_CONN_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.url, "redis://cache:6380");
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.db, 2);
        assert_eq!(config.conn_attempts, 3);
        assert_eq!(config.conn_timeout, Duration::from_millis(250));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[("REDIS_POOL_SIZE", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "REDIS_POOL_SIZE",
                value: "many".to_string()
            }
        );
    }
}
