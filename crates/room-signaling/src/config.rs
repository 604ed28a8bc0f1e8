//! Room signaling configuration.
//!
//! Configuration is loaded from environment variables, with defaults for
//! every value.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default room protocol generation.
pub const DEFAULT_PROTOCOL: ProtocolVersion = ProtocolVersion::V2;

/// Default network quality verbosity for the local participant.
pub const DEFAULT_NQ_LOCAL_VERBOSITY: u8 = 1;

/// Default network quality verbosity for remote participants.
pub const DEFAULT_NQ_REMOTE_VERBOSITY: u8 = 0;

/// Default time to wait for a network quality response before resending.
pub const DEFAULT_NQ_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Default delay before resubmitting inputs after a response arrives.
pub const DEFAULT_NQ_CATCH_UP_DELAY_MS: u64 = 1000;

/// Default room actor mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 500;

/// Default event bus capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Room protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Subscriptions come from the `subscribed` section of snapshots.
    V2,
    /// Subscriptions come from the `track_subscriptions` side-channel.
    V3,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V2 => f.write_str("v2"),
            ProtocolVersion::V3 => f.write_str("v3"),
        }
    }
}

/// Network quality reporting configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkQualityConfig {
    /// Verbosity requested for the local participant (1..=3).
    pub local_verbosity: u8,
    /// Verbosity requested for remote participants (0..=3).
    pub remote_verbosity: u8,
    /// Base resend delay.
    pub response_timeout: Duration,
    /// Delay before resubmitting after a response.
    pub catch_up_delay: Duration,
}

impl Default for NetworkQualityConfig {
    fn default() -> Self {
        Self {
            local_verbosity: DEFAULT_NQ_LOCAL_VERBOSITY,
            remote_verbosity: DEFAULT_NQ_REMOTE_VERBOSITY,
            response_timeout: Duration::from_millis(DEFAULT_NQ_RESPONSE_TIMEOUT_MS),
            catch_up_delay: Duration::from_millis(DEFAULT_NQ_CATCH_UP_DELAY_MS),
        }
    }
}

/// Room signaling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Protocol generation spoken with the server.
    pub protocol: ProtocolVersion,
    /// Network quality reporting.
    pub network_quality: NetworkQualityConfig,
    /// Room actor mailbox capacity.
    pub mailbox_capacity: usize,
    /// Event bus capacity per subscriber.
    pub event_capacity: usize,
    /// Logging.
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL,
            network_quality: NetworkQualityConfig::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn check_range(name: &str, value: u8, min: u8, max: u8) -> Result<u8, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{name}={value} (expected {min}..={max})"
        )))
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let protocol = match vars.get("ROOM_SIGNALING_PROTOCOL").map(|s| s.trim()) {
            None | Some("2") => ProtocolVersion::V2,
            Some("3") => ProtocolVersion::V3,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "ROOM_SIGNALING_PROTOCOL={other}"
                )))
            }
        };

        let local_verbosity = check_range(
            "ROOM_NQ_LOCAL_VERBOSITY",
            parse_var(vars, "ROOM_NQ_LOCAL_VERBOSITY", DEFAULT_NQ_LOCAL_VERBOSITY)?,
            1,
            3,
        )?;

        let remote_verbosity = check_range(
            "ROOM_NQ_REMOTE_VERBOSITY",
            parse_var(vars, "ROOM_NQ_REMOTE_VERBOSITY", DEFAULT_NQ_REMOTE_VERBOSITY)?,
            0,
            3,
        )?;

        let response_timeout_ms = parse_var(
            vars,
            "ROOM_NQ_RESPONSE_TIMEOUT_MS",
            DEFAULT_NQ_RESPONSE_TIMEOUT_MS,
        )?;
        if response_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ROOM_NQ_RESPONSE_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        let catch_up_delay_ms = parse_var(
            vars,
            "ROOM_NQ_CATCH_UP_DELAY_MS",
            DEFAULT_NQ_CATCH_UP_DELAY_MS,
        )?;

        let mailbox_capacity =
            parse_var(vars, "ROOM_MAILBOX_CAPACITY", DEFAULT_MAILBOX_CAPACITY)?;
        let event_capacity = parse_var(vars, "ROOM_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY)?;
        if mailbox_capacity == 0 || event_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "mailbox and event capacities must be positive".to_string(),
            ));
        }

        let log_level = vars
            .get("ROOM_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = parse_var(vars, "ROOM_LOG_JSON", false)?;

        Ok(Config {
            protocol,
            network_quality: NetworkQualityConfig {
                local_verbosity,
                remote_verbosity,
                response_timeout: Duration::from_millis(response_timeout_ms),
                catch_up_delay: Duration::from_millis(catch_up_delay_ms),
            },
            mailbox_capacity,
            event_capacity,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}
