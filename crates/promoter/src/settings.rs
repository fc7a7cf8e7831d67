//! Promoter settings read from the environment.

use std::time::Duration;

use skein_queue::PromoterConfig;
use skein_store::{ConfigError, StoreConfig};

pub const QUEUES_VAR: &str = "SKEIN_QUEUES";
pub const INTERVAL_VAR: &str = "SKEIN_PROMOTE_INTERVAL_MS";
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store: StoreConfig,
    /// Queues whose delayed sets are promoted
    pub queues: Vec<String>,
    pub interval: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store = StoreConfig::from_lookup(&lookup)?;

        let queues: Vec<String> = lookup(QUEUES_VAR)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        if queues.is_empty() {
            return Err(ConfigError::Missing { var: QUEUES_VAR });
        }

        let interval = match lookup(INTERVAL_VAR) {
            None => DEFAULT_INTERVAL,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: INTERVAL_VAR,
                        value: raw,
                    });
                }
            },
        };

        Ok(Self {
            store,
            queues,
            interval,
        })
    }

    pub fn promoter(&self) -> PromoterConfig {
        PromoterConfig::default()
            .with_interval(self.interval)
            .with_queues(self.queues.iter().cloned())
            .with_name("skein-promoter")
    }
}
