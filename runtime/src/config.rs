//! Runtime configuration.
//!
//! [`CourierConfig`] groups the tunables of every runtime component. It loads
//! from TOML (every section and field is optional) and then applies
//! `COURIER_*` environment overrides:
//!
//! | Variable                         | Field                         |
//! |----------------------------------|-------------------------------|
//! | `COURIER_ORCHESTRATION`          | `dispatch.orchestration`      |
//! | `COURIER_RETRY_MAX_ATTEMPTS`     | `retry.max_attempts`          |
//! | `COURIER_RETRY_INITIAL_DELAY_MS` | `retry.initial_delay_ms`      |
//! | `COURIER_RETRY_MAX_DELAY_MS`     | `retry.max_delay_ms`          |
//! | `COURIER_RETRY_MULTIPLIER`       | `retry.multiplier`            |
//! | `COURIER_RETRY_JITTER`           | `retry.jitter`                |
//! | `COURIER_TIMEOUT_MS`             | `timeout.attempt_ms`          |
//! | `COURIER_RELAY_BATCH_SIZE`       | `relay.batch_size`            |
//! | `COURIER_RELAY_POLL_INTERVAL_MS` | `relay.poll_interval_ms`      |
//! | `COURIER_RELAY_DELETE_DELIVERED` | `relay.delete_delivered`      |
//!
//! # Example
//!
//! ```no_run
//! use courier_runtime::config::CourierConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CourierConfig::from_file("courier.toml")?.with_env_overrides()?;
//!
//! let relay_config = config.relay_config();
//! println!("Relay batch size: {}", relay_config.batch_size);
//! # Ok(())
//! # }
//! ```

use crate::orchestrator::{Orchestration, OrchestrationStrategy};
use crate::relay::RelayConfig;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML document is malformed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file cannot be read
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// An environment override does not parse
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Environment variable name
        key: &'static str,
        /// Offending value
        value: String,
    },

    /// A value is out of range
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Dispatch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Event fan-out strategy
    pub orchestration: OrchestrationStrategy,
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on any delay in milliseconds
    pub max_delay_ms: u64,
    /// Backoff growth factor
    pub multiplier: f64,
    /// Randomise delays
    pub jitter: bool,
}

impl RetryConfig {
    /// Validate retry configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be > 0".to_string(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::Validation(
                "retry.multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Validation(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .multiplier(self.multiplier)
            .jitter(self.jitter)
            .build()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-attempt deadline in milliseconds; none when absent
    pub attempt_ms: Option<u64>,
}

impl TimeoutConfig {
    /// Get the deadline as Duration
    #[must_use]
    pub fn attempt(&self) -> Option<Duration> {
        self.attempt_ms.map(Duration::from_millis)
    }
}

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Records per batch
    pub batch_size: usize,
    /// Idle poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Remove records once delivered
    pub delete_delivered: bool,
}

impl RelaySettings {
    /// Get poll interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_ms: 500,
            delete_delivered: false,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Dispatch settings
    pub dispatch: DispatchConfig,
    /// Retry settings
    pub retry: RetryConfig,
    /// Timeout settings
    pub timeout: TimeoutConfig,
    /// Relay settings
    pub relay: RelaySettings,
}

impl CourierConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or invalid
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let document = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Loaded configuration file");
        Self::from_toml_str(&document)
    }

    /// Defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if an override does not parse or the result is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply `COURIER_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if an override does not parse or the result is invalid
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns error if an override does not parse or the result is invalid
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("COURIER_ORCHESTRATION") {
            self.dispatch.orchestration = match value.to_lowercase().as_str() {
                "sequential" => OrchestrationStrategy::Sequential,
                "concurrent" => OrchestrationStrategy::Concurrent,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "COURIER_ORCHESTRATION",
                        value,
                    });
                }
            };
        }

        override_with(&lookup, "COURIER_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts)?;
        override_with(
            &lookup,
            "COURIER_RETRY_INITIAL_DELAY_MS",
            &mut self.retry.initial_delay_ms,
        )?;
        override_with(&lookup, "COURIER_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        override_with(&lookup, "COURIER_RETRY_MULTIPLIER", &mut self.retry.multiplier)?;
        override_with(&lookup, "COURIER_RETRY_JITTER", &mut self.retry.jitter)?;

        if let Some(value) = lookup("COURIER_TIMEOUT_MS") {
            self.timeout.attempt_ms = match value.as_str() {
                "" | "none" | "off" => None,
                millis => Some(millis.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "COURIER_TIMEOUT_MS",
                    value: value.clone(),
                })?),
            };
        }

        override_with(&lookup, "COURIER_RELAY_BATCH_SIZE", &mut self.relay.batch_size)?;
        override_with(
            &lookup,
            "COURIER_RELAY_POLL_INTERVAL_MS",
            &mut self.relay.poll_interval_ms,
        )?;
        override_with(
            &lookup,
            "COURIER_RELAY_DELETE_DELIVERED",
            &mut self.relay.delete_delivered,
        )?;

        self.validate()?;
        Ok(self)
    }

    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.timeout.attempt_ms == Some(0) {
            return Err(ConfigError::Validation(
                "timeout.attempt_ms must be > 0".to_string(),
            ));
        }
        if self.relay.batch_size == 0 {
            return Err(ConfigError::Validation(
                "relay.batch_size must be > 0".to_string(),
            ));
        }
        if self.relay.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "relay.poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured event fan-out.
    #[must_use]
    pub fn orchestration(&self) -> Orchestration {
        self.dispatch.orchestration.into()
    }

    /// The configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    /// The configured per-attempt timeout, if any.
    #[must_use]
    pub fn timeout_policy(&self) -> Option<TimeoutPolicy> {
        self.timeout.attempt().map(TimeoutPolicy::new)
    }

    /// Relay configuration assembled from the retry, timeout and relay
    /// sections.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        let config = RelayConfig::default()
            .with_batch_size(self.relay.batch_size)
            .with_poll_interval(self.relay.poll_interval())
            .with_retry(self.retry_policy())
            .with_delete_delivered(self.relay.delete_delivered);
        match self.timeout.attempt() {
            Some(timeout) => config.with_attempt_timeout(timeout),
            None => config,
        }
    }
}

fn override_with<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    field: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key) {
        *field = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value })?;
    }
    Ok(())
}
