//! Limiter configuration.
//!
//! Configuration is immutable after construction: changing a limit or window
//! means building a new `RateLimiter`. Malformed values fail at construction,
//! never at check time.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TurnstileError};

/// Default request limit per window.
const DEFAULT_LIMIT: u64 = 10;
/// Default window length in milliseconds (one minute).
const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Default counter key prefix.
const DEFAULT_PREFIX: &str = "rl";

/// Counting algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Non-overlapping windows; abrupt reset at each boundary.
    FixedWindow,
    /// Two adjacent windows blended by linear interpolation.
    SlidingWindow,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::FixedWindow
    }
}

/// Configuration for a rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Maximum requests admitted per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window length in milliseconds; accepts a bare integer or a duration
    /// string such as `"30s"`, `"1.5m"`, `"2h"`
    #[serde(
        rename = "window",
        default = "default_window_ms",
        deserialize_with = "deserialize_window"
    )]
    pub window_ms: u64,

    /// Counting algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Prefix prepended to every counter key
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Suppress rate-limit header emission
    #[serde(default)]
    pub skip_headers: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
            algorithm: Algorithm::default(),
            prefix: default_prefix(),
            skip_headers: false,
        }
    }
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn deserialize_window<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawWindow {
        Millis(u64),
        Text(String),
    }

    match RawWindow::deserialize(deserializer)? {
        RawWindow::Millis(ms) => Ok(ms),
        RawWindow::Text(text) => parse_duration_ms(&text).map_err(serde::de::Error::custom),
    }
}

impl RateLimiterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateLimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that can never limit correctly.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(TurnstileError::Config(
                "limit must be a positive integer".to_string(),
            ));
        }
        if self.window_ms == 0 {
            return Err(TurnstileError::Config(
                "window must be a positive duration".to_string(),
            ));
        }
        if self.prefix.is_empty() {
            return Err(TurnstileError::Config(
                "prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string into milliseconds.
///
/// A bare integer passes through unchanged (already milliseconds). Otherwise
/// the value is a decimal number followed by one of `ms`, `s`, `m`, `h`, `d`.
pub fn parse_duration_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TurnstileError::Config(
            "duration must not be empty".to_string(),
        ));
    }

    if input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse::<u64>()
            .map_err(|e| TurnstileError::Config(format!("invalid duration '{}': {}", input, e)));
    }

    let unit_start = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(unit_start);

    let value: f64 = number
        .parse()
        .map_err(|_| TurnstileError::Config(format!("invalid duration '{}'", input)))?;
    if !value.is_finite() || value < 0.0 {
        return Err(TurnstileError::Config(format!(
            "invalid duration '{}'",
            input
        )));
    }

    let unit_ms: f64 = match unit {
        "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => {
            return Err(TurnstileError::Config(format!(
                "unrecognized duration unit '{}' in '{}'",
                unit, input
            )))
        }
    };

    Ok((value * unit_ms).round() as u64)
}
