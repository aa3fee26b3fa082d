//! Runner configuration loaded from environment variables.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// A `RAISE_EVENTS` entry is malformed.
    #[error("Invalid event spec '{0}', expected [suffix/]event=json")]
    InvalidEvent(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// A signal to raise once the workflow is running.
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseEvent {
    /// Child instance suffix (e.g. `pay-1`); `None` targets the started instance.
    pub target: Option<String>,
    pub event: String,
    pub payload: Value,
}

impl RaiseEvent {
    /// Parses `[suffix/]event=json`. A payload that is not valid JSON is taken as a string.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (name, payload) = spec
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidEvent(spec.to_string()))?;
        let (target, event) = match name.trim().rsplit_once('/') {
            Some((target, event)) => (Some(target.to_string()), event),
            None => (None, name.trim()),
        };
        if event.is_empty() || target.as_deref() == Some("") {
            return Err(ConfigError::InvalidEvent(spec.to_string()));
        }

        Ok(Self {
            target,
            event: event.to_string(),
            payload: parse_json_or_string(payload.trim()),
        })
    }
}

/// Runner configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `WORKFLOW`: workflow to start (default: `"Saga"`)
/// - `WORKFLOW_INPUT`: JSON input (default: `null`; non-JSON is taken as a string)
/// - `RAISE_EVENTS`: `;`-separated `[suffix/]event=json` signals to raise
/// - `RAISE_DELAY_MS`: wait before raising signals (default: `500`)
/// - `LINK_DELAY_MS`: per-link delay of `CallChain` (default: `10000`)
/// - `POLL_INTERVAL_MS`: status polling interval (default: `1000`)
/// - `OPERATION_MAX_ATTEMPTS`: operation attempts, including the first (default: `1`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `PRINT_METRICS`: print the Prometheus snapshot on exit (default: `false`)
#[derive(Debug, Clone)]
pub struct Config {
    pub workflow: String,
    pub input: Value,
    pub raise_events: Vec<RaiseEvent>,
    pub raise_delay: Duration,
    pub link_delay: Duration,
    pub poll_interval: Duration,
    pub operation_max_attempts: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub print_metrics: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let raise_events = match lookup("RAISE_EVENTS") {
            Some(raw) => raw
                .split(';')
                .map(str::trim)
                .filter(|spec| !spec.is_empty())
                .map(RaiseEvent::parse)
                .collect::<Result<_, _>>()?,
            None => Vec::new(),
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") => LogFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("text") => LogFormat::Text,
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                    reason: "expected text or json".to_string(),
                });
            }
        };

        Ok(Self {
            workflow: lookup("WORKFLOW").unwrap_or(defaults.workflow),
            input: lookup("WORKFLOW_INPUT")
                .map(|raw| parse_json_or_string(&raw))
                .unwrap_or(defaults.input),
            raise_events,
            raise_delay: millis(&lookup, "RAISE_DELAY_MS")?.unwrap_or(defaults.raise_delay),
            link_delay: millis(&lookup, "LINK_DELAY_MS")?.unwrap_or(defaults.link_delay),
            poll_interval: millis(&lookup, "POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval),
            operation_max_attempts: parsed(&lookup, "OPERATION_MAX_ATTEMPTS")?
                .unwrap_or(defaults.operation_max_attempts),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            print_metrics: parsed(&lookup, "PRINT_METRICS")?.unwrap_or(defaults.print_metrics),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow: "Saga".to_string(),
            input: Value::Null,
            raise_events: Vec::new(),
            raise_delay: Duration::from_millis(500),
            link_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            operation_max_attempts: 1,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            print_metrics: false,
        }
    }
}

fn parse_json_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parsed::<u64>(lookup, key)?.map(Duration::from_millis))
}
