use std::time::Duration;

use crate::reconnect::ReconnectConfig;

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults that match a generation service running
/// locally on port 8000.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base HTTP URL of the generation service.
    pub api_url: String,
    /// Push channel endpoint.
    pub ws_url: String,
    /// Interval between full-listing polls.
    pub poll_interval: Duration,
    /// Upper bound on every HTTP request.
    pub request_timeout: Duration,
    /// Delay before the first push reconnect attempt.
    pub reconnect_initial: Duration,
    /// Cap on the push reconnect delay.
    pub reconnect_max: Duration,
    /// How long tombstones are kept. `None` keeps them for the engine's lifetime.
    pub tombstone_retention: Option<Duration>,
    /// Buffer size of the change-notification channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            ws_url: "ws://localhost:8000/ws".into(),
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_millis(1000),
            reconnect_max: Duration::from_secs(30),
            tombstone_retention: None,
            event_capacity: 256,
        }
    }
}

/// A configuration variable could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                  |
    /// |----------------------------|--------------------------|
    /// | `GENERATOR_API_URL`        | `http://localhost:8000`  |
    /// | `GENERATOR_WS_URL`         | `ws://localhost:8000/ws` |
    /// | `POLL_INTERVAL_SECS`       | `5`                      |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                     |
    /// | `RECONNECT_INITIAL_MS`     | `1000`                   |
    /// | `RECONNECT_MAX_SECS`       | `30`                     |
    /// | `TOMBSTONE_RETENTION_SECS` | unset (keep forever)     |
    /// | `EVENT_CHANNEL_CAPACITY`   | `256`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = lookup("GENERATOR_API_URL").unwrap_or(defaults.api_url);
        let ws_url = lookup("GENERATOR_WS_URL").unwrap_or(defaults.ws_url);

        let poll_interval_secs: u64 = parse_var(&lookup, "POLL_INTERVAL_SECS", 5)?;
        let poll_interval = positive_secs("POLL_INTERVAL_SECS", poll_interval_secs)?;

        let request_timeout_secs: u64 = parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 30)?;
        let request_timeout = positive_secs("REQUEST_TIMEOUT_SECS", request_timeout_secs)?;

        let reconnect_initial_ms: u64 = parse_var(&lookup, "RECONNECT_INITIAL_MS", 1000)?;
        let reconnect_max_secs: u64 = parse_var(&lookup, "RECONNECT_MAX_SECS", 30)?;

        let tombstone_retention = match lookup("TOMBSTONE_RETENTION_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value(
                "TOMBSTONE_RETENTION_SECS",
                &raw,
            )?)),
            None => None,
        };

        let event_capacity: usize = parse_var(&lookup, "EVENT_CHANNEL_CAPACITY", 256)?;

        Ok(Self {
            api_url,
            ws_url,
            poll_interval,
            request_timeout,
            reconnect_initial: Duration::from_millis(reconnect_initial_ms),
            reconnect_max: Duration::from_secs(reconnect_max_secs),
            tombstone_retention,
            event_capacity,
        })
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.reconnect_initial,
            max_delay: self.reconnect_max.max(self.reconnect_initial),
            ..Default::default()
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn positive_secs(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: secs.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
