//! Settings shared by all the checks, read from the process environment.
//!
//! Every checker reads its own knobs through an [Env], which treats empty variables as unset
//! so defaults apply the same way whether a variable is missing or blank.
use std::time::Duration;
use thiserror::Error;

pub const CLUSTER_NAME_ENV: &str = "CLUSTER_NAME";
pub const DEFAULT_CHECK_TIMEOUT_MINUTES: u64 = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Missing(String),
    #[error("invalid duration in `{key}`: {err}")]
    InvalidDuration { key: String, err: String },
}

/// Read-only view over environment variables.
pub struct Env<'a> {
    lookup: Box<dyn Fn(&str) -> Option<String> + 'a>,
}

impl Env<'static> {
    pub fn from_process() -> Self {
        Self::from_fn(|key| std::env::var(key).ok())
    }
}

impl<'a> Env<'a> {
    pub fn from_fn<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'a,
    {
        Self {
            lookup: Box::new(lookup),
        }
    }

    pub fn from_pairs(pairs: &'a [(&'a str, &'a str)]) -> Self {
        Self::from_fn(move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
    }

    /// Value of `key`, `None` when missing or empty.
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parses `key` as a human readable duration such as `5m` or `1h30m`.
    pub fn duration_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => {
                duration_str::parse(&value).map_err(|err| ConfigError::InvalidDuration {
                    key: key.to_string(),
                    err: err.to_string(),
                })
            }
        }
    }
}

/// Polling cadence and overall bound of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Same interval, timeout overridden by the duration in `key` if it is set.
    pub fn with_timeout_from(self, env: &Env, key: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            timeout: env.duration_or(key, self.timeout)?,
            ..self
        })
    }
}

/// Settings every check run receives regardless of the add-on under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Keep the created resources around after the run.
    pub debug: bool,
    /// Default bound for the waits of a check.
    pub timeout: Duration,
    pub cluster_name: String,
}

impl RunSettings {
    pub fn new(debug: bool, timeout: Duration, env: &Env) -> Self {
        Self {
            debug,
            timeout,
            cluster_name: env.get_or(CLUSTER_NAME_ENV, "unknown"),
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            debug: false,
            timeout: Duration::from_secs(DEFAULT_CHECK_TIMEOUT_MINUTES * 60),
            cluster_name: "unknown".to_string(),
        }
    }
}
