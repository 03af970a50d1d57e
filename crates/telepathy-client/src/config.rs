//! Environment-backed configuration for channel proxies.

use std::{env, error::Error, fmt};

use telepathy_core::CoreOptions;

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime configuration applied to every channel created with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Capacity of each channel's notification broadcast.
    pub event_buffer: usize,
    /// Log a warning when an accessor is read before the channel is ready.
    pub warn_not_ready: bool,
    /// Synthesize a two-member group for one-to-one channels without a Group interface.
    pub fake_group: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
            warn_not_ready: true,
            fake_group: true,
        }
    }
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let event_buffer =
            parse_optional_usize("TP_CLIENT_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;
        let warn_not_ready = parse_optional_bool("TP_CLIENT_WARN_NOT_READY", true, &mut lookup)?;
        let fake_group = parse_optional_bool("TP_CLIENT_FAKE_GROUP", true, &mut lookup)?;

        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TP_CLIENT_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            event_buffer,
            warn_not_ready,
            fake_group,
        })
    }

    pub fn core_options(&self) -> CoreOptions {
        CoreOptions {
            warn_not_ready: self.warn_not_ready,
            fake_group: self.fake_group,
        }
    }
}

/// Configuration parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(key: &'static str, default: bool, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean (true/false, 1/0, yes/no, on/off)".to_owned(),
        }),
    }
}
