//! Recognized configuration keys and their value rules.
//!
//! The config table itself is untyped string key-value storage; typing lives
//! here so the control surface can validate before writing and the store can
//! parse when it needs a value. Both dash and underscore spellings are
//! accepted on the way in; the underscore form is canonical.

use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigValueError {
    #[error("'{0}' must be an integer")]
    ExpectedInteger(&'static str),
    #[error("'{0}' must be a number")]
    ExpectedNumber(&'static str),
}

/// The configuration keys queuectl acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    /// Default retry budget snapshotted into jobs enqueued without one.
    MaxRetries,
    /// Base of the exponential retry backoff, read by workers at startup.
    BackoffBase,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 2] = [ConfigKey::MaxRetries, ConfigKey::BackoffBase];

    /// Accepts both spellings, e.g. `max-retries` and `max_retries`.
    pub fn parse(raw: &str) -> Option<ConfigKey> {
        match raw {
            "max_retries" | "max-retries" => Some(ConfigKey::MaxRetries),
            "backoff_base" | "backoff-base" => Some(ConfigKey::BackoffBase),
            _ => None,
        }
    }

    /// Canonical stored spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "3",
            ConfigKey::BackoffBase => "2",
        }
    }

    /// Type-check a value for this key before it is stored.
    pub fn validate(&self, value: &str) -> Result<(), ConfigValueError> {
        match self {
            ConfigKey::MaxRetries => {
                i64::from_str(value)
                    .map_err(|_| ConfigValueError::ExpectedInteger(self.as_str()))?;
            }
            ConfigKey::BackoffBase => {
                f64::from_str(value)
                    .map_err(|_| ConfigValueError::ExpectedNumber(self.as_str()))?;
            }
        }
        Ok(())
    }
}
