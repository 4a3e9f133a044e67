// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration.
//!
//! The file is TOML with one setting per key. Settings can be overridden from the environment
//! with the `AUDIT_RELAY_` prefix, e.g. `AUDIT_RELAY_QUEUEMAXLENGTH=500`. Values that are
//! malformed or out of range are reported and replaced by their defaults.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

use crate::errors::ConfigError;
use crate::queue::DEFAULT_QUEUE_MAX_LENGTH;
use crate::sink::SinkSettings;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/audit-relay/audit-relay.conf";
/// Overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "AUDIT_RELAY_CONFIG";
/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "AUDIT_RELAY_";
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/audit-relay/sink.sock";
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 60;

const PRINTSTATS: &str = "printstats";
const PRINTSTATSFREQ: &str = "printstatsfreq";
const QUEUEMAXLENGTH: &str = "queuemaxlength";

/// Variables sharing [`ENV_PREFIX`] that are not settings.
const NON_SETTING_ENV: &[&str] = &["config", "log_level"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket of the audit-logging sink.
    #[serde(rename = "socket")]
    pub socket_path: PathBuf,
    /// Schema directory handed to the sink; the sink's own default when unset.
    #[serde(rename = "schemas")]
    pub schemas_path: Option<PathBuf>,
    #[serde(rename = "keypath")]
    pub key_path: Option<PathBuf>,
    #[serde(rename = "certpath")]
    pub cert_path: Option<PathBuf>,
    #[serde(rename = "printstats", deserialize_with = "deserialize_flag")]
    pub print_stats: bool,
    #[serde(rename = "printstatsfreq", deserialize_with = "deserialize_stats_interval")]
    pub print_stats_interval: Duration,
    #[serde(rename = "queuemaxlength", deserialize_with = "deserialize_queue_length")]
    pub queue_max_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            schemas_path: None,
            key_path: None,
            cert_path: None,
            print_stats: false,
            print_stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            queue_max_length: DEFAULT_QUEUE_MAX_LENGTH,
        }
    }
}

impl Config {
    /// Path of the configuration file, honouring [`CONFIG_PATH_ENV`].
    pub fn path_from_env() -> PathBuf {
        env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Loads the file at `path`, then applies environment overrides. A missing file is an error.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        extract(
            Figment::new()
                .merge(Toml::string(&contents))
                .merge(Env::prefixed(ENV_PREFIX).ignore(NON_SETTING_ENV)),
        )
    }

    /// Parses file contents alone, without environment overrides.
    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        extract(Figment::from(Toml::string(contents)))
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            socket_path: self.socket_path.clone(),
            schemas_path: self.schemas_path.clone(),
            key_path: self.key_path.clone(),
            cert_path: self.cert_path.clone(),
        }
    }
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::Parse(Box::new(e)))
}

/// Accepts booleans, `0`/`1` and the usual on/off words.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let flag = match &value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    };
    Ok(flag.unwrap_or_else(|| {
        error!("{PRINTSTATS} in config file is not a boolean: {value}. Using default value");
        Config::default().print_stats
    }))
}

fn deserialize_stats_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match positive_limit(&value) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            error!("{PRINTSTATSFREQ} in config file is invalid: {value}. Using default value");
            Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS)
        }
    })
}

fn deserialize_queue_length<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match positive_limit(&value).and_then(|len| usize::try_from(len).ok()) {
        Some(len) => Ok(len),
        None => {
            error!("{QUEUEMAXLENGTH} in config file is invalid: {value}. Using default value");
            Ok(DEFAULT_QUEUE_MAX_LENGTH)
        }
    }
}

/// A count in `1..=i32::MAX`, given as a number or a numeric string.
fn positive_limit(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (n > 0 && n <= i32::MAX as u64).then_some(n)
}
