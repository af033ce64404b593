use std::time::Duration;

use einvoice_transfer::config::{parse_or, secs_or};
use einvoice_transfer::{ClientConfig, ConfigError};

use crate::poller::PollSettings;

/// Everything a long-running worker needs, read from `EINVOICE_*` variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub client: ClientConfig,
    pub poll: PollSettings,
    pub inbox_interval: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let client = ClientConfig::from_lookup(&lookup)?;
        let defaults = PollSettings::default();

        let max_attempts: u32 = parse_or("EINVOICE_POLL_MAX_ATTEMPTS", &lookup, defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "EINVOICE_POLL_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            client,
            poll: PollSettings {
                interval: secs_or("EINVOICE_POLL_INTERVAL_SECS", &lookup, defaults.interval)?,
                max_attempts,
            },
            inbox_interval: secs_or("EINVOICE_INBOX_INTERVAL_SECS", &lookup, Duration::from_secs(300))?,
        })
    }
}
